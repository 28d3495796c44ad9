//! Thread-safe processing pipeline, shared by all effect instances of a process.
//!
//! The pipeline uses two separate synchronization domains:
//!
//! - The *control domain* is a mutex which serializes engine construction, destruction and
//!   reconfiguration. It's only ever taken by control threads.
//! - The *data domain* consists of atomic flags and counters, and the engine itself, which gets
//!   published via an [`ArcSwapOption`]. The real-time thread only reads the flags, loads the
//!   engine without locking and `try_lock`s the engine's state. When a control thread holds the
//!   engine, the real-time thread skips the period instead of waiting.
//!
//! The real-time thread never needs to hold both domains at once.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError,
};

use arc_swap::ArcSwapOption;
use atomic_float::AtomicF64;

use crate::{
    engine::{EngineAdapter, EngineMetrics},
    utils::stretcher::{
        is_valid_pitch_ratio, semitones_from_ratio, signalsmith_factory, EngineFactory,
        EngineParameters, StretchSpecs,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Snapshot of the pipeline's performance counters.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Estimated input to output latency of the engine.
    pub latency_ms: f32,
    /// CPU usage of the last processed period.
    pub cpu_percent: f32,
    /// Total number of frames which got passed to the engine.
    pub frames_processed: u64,
    /// Total number of frames the engine could not deliver in time and got replaced by silence.
    pub frames_dropped: u64,
}

// -------------------------------------------------------------------------------------------------

/// A published engine: the adapter's mutable state and its lock-free metrics.
struct EngineSlot {
    adapter: Mutex<EngineAdapter>,
    metrics: Arc<EngineMetrics>,
}

impl EngineSlot {
    fn new(adapter: EngineAdapter) -> Self {
        let metrics = adapter.metrics();
        Self {
            adapter: Mutex::new(adapter),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineAdapter> {
        self.adapter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -------------------------------------------------------------------------------------------------

/// Process-scoped service which owns the pitch-shifting engine.
///
/// The engine is constructed once via [`initialize`](Self::initialize), which is too costly to
/// do in the real-time thread, and then cheaply toggled via [`set_enabled`](Self::set_enabled).
///
/// Create independent instances via [`new`](Self::new), or access the process-wide instance used
/// by the C ABI via [`shared`](Self::shared).
pub struct Pipeline {
    factory: EngineFactory,
    params: EngineParameters,
    control_lock: Mutex<()>,
    engine: ArcSwapOption<EngineSlot>,
    enabled: AtomicBool,
    initialized: AtomicBool,
    pitch_ratio: AtomicF64,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Pipeline {
    /// Create a new, uninitialized pipeline which creates its engine via the given factory.
    pub fn new(params: EngineParameters, factory: EngineFactory) -> Self {
        Self {
            factory,
            params,
            control_lock: Mutex::new(()),
            engine: ArcSwapOption::empty(),
            enabled: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            pitch_ratio: AtomicF64::new(params.pitch_ratio),
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// The process-wide pipeline instance, lazily created with the default engine.
    pub fn shared() -> Arc<Pipeline> {
        static SHARED: OnceLock<Arc<Pipeline>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Pipeline::default())))
    }

    /// Construct the engine for the given format.
    ///
    /// Returns `Ok(true)` when the engine got constructed and `Ok(false)` when the pipeline
    /// already was initialized. In the latter case nothing changes: use
    /// [`reconfigure`](Self::reconfigure) to apply a new format.
    pub fn initialize(&self, sample_rate: u32, channel_count: usize) -> Result<bool, Error> {
        let _guard = self.lock_control();
        if self.initialized.load(Ordering::Acquire) {
            log::debug!("Pipeline already is initialized");
            return Ok(false);
        }
        if sample_rate == 0 || channel_count == 0 {
            return Err(Error::InvalidArgument(format!(
                "Invalid pipeline format: {sample_rate} Hz, {channel_count} channels"
            )));
        }

        let params = self
            .params
            .with_pitch_ratio(self.pitch_ratio.load(Ordering::Acquire));
        let specs = StretchSpecs::new(sample_rate, channel_count, params);
        let adapter = EngineAdapter::new(specs, Arc::clone(&self.factory)).map_err(|err| {
            log::error!("Failed to create pitch-shift engine: {err}");
            if matches!(err, Error::ResourceExhausted(_)) {
                err
            } else {
                Error::ResourceExhausted(err.to_string())
            }
        })?;

        self.engine.store(Some(Arc::new(EngineSlot::new(adapter))));
        self.initialized.store(true, Ordering::Release);

        log::info!(
            "Pipeline initialized: {sample_rate} Hz, {channel_count} channels, \
             pitch ratio {:.6} ({:.4} semitones)",
            params.pitch_ratio,
            params.pitch_semitones()
        );
        Ok(true)
    }

    /// Destroy the engine. Safe to call when the pipeline never got initialized.
    pub fn shutdown(&self) {
        let _guard = self.lock_control();
        self.initialized.store(false, Ordering::Release);
        if self.engine.swap(None).is_some() {
            log::info!("Pipeline shut down");
        }
    }

    /// Apply a new format to the existing engine, dropping all its buffered samples.
    pub fn reconfigure(&self, sample_rate: u32, channel_count: usize) -> Result<(), Error> {
        let _guard = self.lock_control();
        if sample_rate == 0 || channel_count == 0 {
            return Err(Error::InvalidArgument(format!(
                "Invalid pipeline format: {sample_rate} Hz, {channel_count} channels"
            )));
        }
        match &*self.engine.load() {
            Some(slot) => slot.lock().set_format(sample_rate, channel_count),
            None => Err(Error::NotReady("Pipeline is not initialized".into())),
        }
    }

    /// Drop all samples buffered in the engine, if there is one.
    pub fn reset_engine(&self) {
        let _guard = self.lock_control();
        if let Some(slot) = &*self.engine.load() {
            slot.lock().reset();
        }
    }

    /// Process the first `frame_count` interleaved frames of the given buffer in place, in
    /// whatever format the engine currently runs.
    ///
    /// Returns false and leaves the buffer untouched when the pipeline is not initialized, is
    /// disabled, is busy being reconfigured, or when the buffer or frame count is invalid.
    ///
    /// Never blocks: this is the real-time entry point of the pipeline.
    pub fn process_in_place(&self, buffer: &mut [i16], frame_count: usize) -> bool {
        self.process_engine(buffer, frame_count, None)
    }

    /// Same as [`process_in_place`](Self::process_in_place), but only processes the buffer when
    /// the engine runs with the given sample rate and channel count.
    ///
    /// The engine is shared, so another instance may have reconfigured it with a different
    /// format. Buffers in a foreign format are left untouched and return false.
    pub fn process_in_place_with_format(
        &self,
        buffer: &mut [i16],
        frame_count: usize,
        sample_rate: u32,
        channel_count: usize,
    ) -> bool {
        self.process_engine(buffer, frame_count, Some((sample_rate, channel_count)))
    }

    fn process_engine(
        &self,
        buffer: &mut [i16],
        frame_count: usize,
        format: Option<(u32, usize)>,
    ) -> bool {
        if buffer.is_empty() || frame_count == 0 {
            return false;
        }
        if !self.enabled.load(Ordering::Acquire) || !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        let engine = self.engine.load();
        let Some(slot) = &*engine else {
            return false;
        };
        let mut adapter = match slot.adapter.try_lock() {
            Ok(adapter) => adapter,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if let Some((sample_rate, channel_count)) = format {
            if !adapter.has_format(sample_rate, channel_count) {
                return false;
            }
        }
        if !adapter.can_process(buffer.len(), frame_count) {
            return false;
        }

        let frames_written = Self::assert_no_alloc(|| adapter.process(buffer, frame_count));

        self.frames_processed
            .fetch_add(frame_count as u64, Ordering::AcqRel);
        if frames_written < frame_count {
            self.frames_dropped
                .fetch_add((frame_count - frames_written) as u64, Ordering::AcqRel);
        }
        true
    }

    /// Enable or disable processing. Takes effect with the next process call.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Format and parameters of the current engine, if there is one.
    pub fn engine_specs(&self) -> Option<StretchSpecs> {
        let _guard = self.lock_control();
        match &*self.engine.load() {
            Some(slot) => Some(slot.lock().specs()),
            None => None,
        }
    }

    /// Change the frequency ratio of the current and all future engines.
    pub fn set_pitch_ratio(&self, ratio: f64) -> Result<(), Error> {
        if !is_valid_pitch_ratio(ratio) {
            return Err(Error::InvalidArgument(format!(
                "Pitch ratio {ratio} out of range"
            )));
        }
        let _guard = self.lock_control();
        if let Some(slot) = &*self.engine.load() {
            slot.lock().set_pitch_ratio(ratio)?;
        }
        self.pitch_ratio.store(ratio, Ordering::Release);
        log::info!(
            "Pitch ratio set to {ratio:.6} ({:.4} semitones)",
            semitones_from_ratio(ratio)
        );
        Ok(())
    }

    pub fn pitch_ratio(&self) -> f64 {
        self.pitch_ratio.load(Ordering::Acquire)
    }

    pub fn pitch_semitones(&self) -> f64 {
        semitones_from_ratio(self.pitch_ratio())
    }

    /// A consistent snapshot of the pipeline's stats. Never blocks.
    ///
    /// An uninitialized pipeline reports zero latency and CPU usage.
    pub fn stats(&self) -> PipelineStats {
        let engine = self.engine.load();
        let (latency_ms, cpu_percent) = match &*engine {
            Some(slot) if self.is_initialized() => {
                (slot.metrics.latency_ms(), slot.metrics.cpu_percent())
            }
            _ => (0.0, 0.0),
        };
        PipelineStats {
            latency_ms,
            cpu_percent,
            frames_processed: self.frames_processed.load(Ordering::Acquire),
            frames_dropped: self.frames_dropped.load(Ordering::Acquire),
        }
    }

    /// Reset the frame counters. Does not change the enabled or initialized state.
    pub fn reset_stats(&self) {
        self.frames_processed.store(0, Ordering::Release);
        self.frames_dropped.store(0, Ordering::Release);
    }

    fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.control_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline(always)]
    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(EngineParameters::default(), signalsmith_factory())
    }
}

// -------------------------------------------------------------------------------------------------
