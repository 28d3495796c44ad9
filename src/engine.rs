use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use atomic_float::AtomicF32;

use crate::{
    utils::{
        buffer::clear_buffer,
        pcm::{float_to_pcm16, pcm16_to_float},
        stretcher::{
            is_valid_pitch_ratio, EngineFactory, StretchSpecs, TimeStretchEngine, MAX_FRAME_COUNT,
        },
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Performance metrics of an [`EngineAdapter`], readable from any thread without locking.
///
/// Values are approximate: they are written with relaxed ordering and must not be used for
/// control decisions.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    cpu_percent: AtomicF32,
    latency_ms: AtomicF32,
}

impl EngineMetrics {
    /// Instantaneous CPU usage of the last process call, relative to the duration of the audio
    /// it processed.
    pub fn cpu_percent(&self) -> f32 {
        self.cpu_percent.load(Ordering::Relaxed)
    }

    /// Estimated input to output latency.
    pub fn latency_ms(&self) -> f32 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    fn record_cpu_load(&self, processing_time: Duration, frame_count: usize, sample_rate: u32) {
        let audio_time_secs = frame_count as f32 / sample_rate as f32;
        if audio_time_secs > 0.0 {
            let cpu_percent = processing_time.as_secs_f32() / audio_time_secs * 100.0;
            self.cpu_percent.store(cpu_percent, Ordering::Relaxed);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Owns a [`TimeStretchEngine`] and streams PCM16 buffers through it.
///
/// All buffers needed for processing are allocated up front, so `process` never allocates.
pub struct EngineAdapter {
    specs: StretchSpecs,
    factory: EngineFactory,
    engine: Box<dyn TimeStretchEngine>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
    metrics: Arc<EngineMetrics>,
}

impl EngineAdapter {
    /// Create a new engine via the given factory.
    pub fn new(specs: StretchSpecs, factory: EngineFactory) -> Result<Self, Error> {
        let engine = factory(&specs)?;
        let metrics = Arc::new(EngineMetrics::default());
        metrics
            .latency_ms
            .store(specs.params.latency_ms(), Ordering::Relaxed);

        let buffer_len = MAX_FRAME_COUNT * specs.channel_count;
        Ok(Self {
            specs,
            factory,
            engine,
            input_buffer: vec![0.0; buffer_len],
            output_buffer: vec![0.0; buffer_len],
            metrics,
        })
    }

    pub fn specs(&self) -> StretchSpecs {
        self.specs
    }

    /// Shared handle to the adapter's metrics.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns true when the engine runs with the given sample rate and channel count.
    pub fn has_format(&self, sample_rate: u32, channel_count: usize) -> bool {
        self.specs.sample_rate == sample_rate && self.specs.channel_count == channel_count
    }

    /// Returns true when `process` would accept the given buffer and frame count.
    pub fn can_process(&self, buffer_len: usize, frame_count: usize) -> bool {
        frame_count > 0
            && frame_count <= MAX_FRAME_COUNT
            && buffer_len >= frame_count * self.specs.channel_count
    }

    /// Pitch-shift the first `frame_count` interleaved frames of the given buffer in place.
    ///
    /// Returns the number of frames the engine produced. Frames the engine could not deliver
    /// yet are filled with silence. Invalid buffers or frame counts are ignored and yield 0.
    pub fn process(&mut self, buffer: &mut [i16], frame_count: usize) -> usize {
        if !self.can_process(buffer.len(), frame_count) {
            return 0;
        }
        let start_time = Instant::now();

        let channel_count = self.specs.channel_count;
        let sample_count = frame_count * channel_count;
        let buffer = &mut buffer[..sample_count];

        let input = &mut self.input_buffer[..sample_count];
        pcm16_to_float(buffer, input);
        self.engine.push(input);

        let output = &mut self.output_buffer[..sample_count];
        let frames_received = self.engine.pull(output) / channel_count;
        let samples_received = frames_received * channel_count;

        float_to_pcm16(&output[..samples_received], &mut buffer[..samples_received]);
        // never hand out stale data from previous periods
        clear_buffer(&mut buffer[samples_received..]);

        self.metrics
            .record_cpu_load(start_time.elapsed(), frame_count, self.specs.sample_rate);

        frames_received
    }

    /// Apply a new sample rate and channel count.
    ///
    /// When the format changes, the engine gets recreated, else it only gets reset. Either way,
    /// all buffered samples are dropped.
    pub fn set_format(&mut self, sample_rate: u32, channel_count: usize) -> Result<(), Error> {
        if sample_rate == self.specs.sample_rate && channel_count == self.specs.channel_count {
            self.reset();
            return Ok(());
        }
        let specs = StretchSpecs::new(sample_rate, channel_count, self.specs.params);
        self.engine = (self.factory)(&specs)?;
        let buffer_len = MAX_FRAME_COUNT * channel_count;
        self.input_buffer = vec![0.0; buffer_len];
        self.output_buffer = vec![0.0; buffer_len];
        self.specs = specs;
        log::info!("Engine format changed to {sample_rate} Hz, {channel_count} channels");
        Ok(())
    }

    /// Change the engine's frequency ratio.
    pub fn set_pitch_ratio(&mut self, ratio: f64) -> Result<(), Error> {
        if !is_valid_pitch_ratio(ratio) {
            return Err(Error::InvalidArgument(format!("Pitch ratio {ratio} out of range")));
        }
        self.specs.params.pitch_ratio = ratio;
        self.engine.set_pitch_ratio(ratio);
        Ok(())
    }

    /// Drop all samples buffered in the engine.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.metrics.cpu_percent.store(0.0, Ordering::Relaxed);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::stretcher::{fake::FakeEngineFactory, EngineParameters};

    fn adapter(sample_rate: u32, channel_count: usize, latency_frames: usize) -> EngineAdapter {
        let factory = FakeEngineFactory::new(latency_frames);
        let specs = StretchSpecs::new(sample_rate, channel_count, EngineParameters::default());
        EngineAdapter::new(specs, factory.factory()).unwrap()
    }

    #[test]
    fn pads_startup_latency_with_silence() {
        let mut adapter = adapter(48000, 2, 100);

        let mut buffer = vec![1000i16; 480 * 2];
        assert_eq!(adapter.process(&mut buffer, 480), 380);
        assert!(buffer[..380 * 2].iter().all(|s| *s == 1000));
        assert!(buffer[380 * 2..].iter().all(|s| *s == 0));

        // steady state: everything gets through
        let mut buffer = vec![-1000i16; 480 * 2];
        assert_eq!(adapter.process(&mut buffer, 480), 480);
        assert!(buffer.iter().all(|s| *s == -1000));
    }

    #[test]
    fn invalid_inputs_are_ignored() {
        let mut adapter = adapter(48000, 2, 0);

        let mut empty: [i16; 0] = [];
        assert_eq!(adapter.process(&mut empty, 0), 0);

        let mut buffer = vec![7i16; 10];
        assert_eq!(adapter.process(&mut buffer, 0), 0);
        // buffer too short for the requested frames
        assert_eq!(adapter.process(&mut buffer, 6), 0);
        assert!(buffer.iter().all(|s| *s == 7));

        let mut large = vec![7i16; (MAX_FRAME_COUNT + 1) * 2];
        assert_eq!(adapter.process(&mut large, MAX_FRAME_COUNT + 1), 0);
    }

    #[test]
    fn only_touches_requested_frames() {
        let mut adapter = adapter(48000, 1, 0);
        let mut buffer = vec![5i16; 16];
        assert_eq!(adapter.process(&mut buffer, 8), 8);
        assert!(buffer.iter().all(|s| *s == 5));
    }

    #[test]
    fn records_metrics() {
        let mut adapter = adapter(48000, 2, 0);
        let metrics = adapter.metrics();
        assert_eq!(metrics.latency_ms(), EngineParameters::default().latency_ms());
        assert_eq!(metrics.cpu_percent(), 0.0);

        let mut buffer = vec![0i16; 480 * 2];
        adapter.process(&mut buffer, 480);
        assert!(metrics.cpu_percent() >= 0.0);

        adapter.reset();
        assert_eq!(metrics.cpu_percent(), 0.0);
    }

    #[test]
    fn format_changes_restart_the_engine() {
        let factory = FakeEngineFactory::new(10);
        let specs = StretchSpecs::new(48000, 2, EngineParameters::default());
        let mut adapter = EngineAdapter::new(specs, factory.factory()).unwrap();
        assert_eq!(factory.created(), 1);

        // same format: reset only
        adapter.set_format(48000, 2).unwrap();
        assert_eq!(factory.created(), 1);

        adapter.set_format(44100, 1).unwrap();
        assert_eq!(factory.created(), 2);
        assert_eq!(adapter.specs().sample_rate, 44100);
        assert_eq!(adapter.specs().channel_count, 1);
        assert!(adapter.has_format(44100, 1));
        assert!(!adapter.has_format(48000, 2));
        assert!(!adapter.has_format(44100, 2));

        // restarted engine applies its startup latency again
        let mut buffer = vec![100i16; 20];
        assert_eq!(adapter.process(&mut buffer, 20), 10);
    }

    #[test]
    fn pitch_ratio() {
        let mut adapter = adapter(48000, 2, 0);
        adapter.set_pitch_ratio(1.5).unwrap();
        assert_eq!(adapter.specs().params.pitch_ratio, 1.5);
        assert!(adapter.set_pitch_ratio(0.0).is_err());
        assert!(adapter.set_pitch_ratio(3.0).is_err());
        assert_eq!(adapter.specs().params.pitch_ratio, 1.5);
    }
}
