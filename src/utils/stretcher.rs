//! TimeStretchEngine trait for pitch-shifting interleaved audio while preserving its tempo.

use std::sync::Arc;

use crate::Error;

pub(crate) mod signalsmith;

#[cfg(test)]
pub(crate) mod fake;

pub use signalsmith::SignalSmithEngine;

// -------------------------------------------------------------------------------------------------

/// Frequency ratio which retunes A4 = 440 Hz to A4 = 432 Hz.
pub const PITCH_RATIO_432_HZ: f64 = 432.0 / 440.0;

/// Maximum number of frames a single engine call may process.
pub const MAX_FRAME_COUNT: usize = 8192;

/// Convert a frequency ratio into a pitch shift in semitones.
pub fn semitones_from_ratio(ratio: f64) -> f64 {
    12.0 * ratio.log2()
}

/// Returns true if the given frequency ratio can be applied by the engines.
pub fn is_valid_pitch_ratio(ratio: f64) -> bool {
    ratio.is_finite() && ratio > 0.0 && ratio <= 2.0
}

// -------------------------------------------------------------------------------------------------

/// Tuning parameters of a time-stretch engine.
///
/// The window sizes describe the engine's internal buffering and define the fixed latency
/// estimate which is reported to hosts. The defaults keep the estimate below a 20 ms budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParameters {
    /// Target frequency divided by source frequency.
    pub pitch_ratio: f64,
    /// Length of a single processing sequence in milliseconds.
    pub sequence_window_ms: f32,
    /// Length of the best-overlap search window in milliseconds.
    pub seek_window_ms: f32,
    /// Crossfade length of two sequences in milliseconds.
    pub overlap_ms: f32,
    /// Prefer a faster, less accurate seek (cheaper engine preset).
    pub quick_seek_enabled: bool,
    /// Limit tonal processing to the audible band to avoid aliasing.
    pub anti_alias_filter_enabled: bool,
}

impl EngineParameters {
    /// Upper frequency bound of the tonal processing, when the anti-alias filter is enabled.
    pub const ANTI_ALIAS_CUTOFF_HZ: f32 = 8000.0;

    pub fn with_pitch_ratio(mut self, pitch_ratio: f64) -> Self {
        debug_assert!(is_valid_pitch_ratio(pitch_ratio), "Invalid pitch ratio");
        self.pitch_ratio = pitch_ratio;
        self
    }

    /// Pitch shift in semitones, derived from the pitch ratio.
    pub fn pitch_semitones(&self) -> f64 {
        semitones_from_ratio(self.pitch_ratio)
    }

    /// Analytic latency estimate in milliseconds. Independent of the sample rate.
    pub fn latency_ms(&self) -> f32 {
        self.sequence_window_ms / 2.0 + self.seek_window_ms + self.overlap_ms
    }
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self {
            pitch_ratio: PITCH_RATIO_432_HZ,
            sequence_window_ms: 20.0,
            seek_window_ms: 4.0,
            overlap_ms: 2.0,
            quick_seek_enabled: true,
            anti_alias_filter_enabled: true,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Time-stretch engine specs.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StretchSpecs {
    pub sample_rate: u32,
    pub channel_count: usize,
    pub params: EngineParameters,
}

impl StretchSpecs {
    pub fn new(sample_rate: u32, channel_count: usize, params: EngineParameters) -> Self {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        debug_assert!(channel_count > 0, "Invalid channel count");
        Self {
            sample_rate,
            channel_count,
            params,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Streaming pitch-shift engine interface.
///
/// Engines consume interleaved samples via `push` and hand out processed samples via `pull`.
/// Due to internal buffering, an engine may hand out less samples than it got fed, especially
/// right after it got created or reset.
///
/// NB: `push` and `pull` are called in the real-time audio thread, so they must not block or
/// allocate. All other functions are called from control threads.
pub trait TimeStretchEngine: Send {
    /// Feed interleaved input samples into the engine.
    fn push(&mut self, input: &[f32]);

    /// Move up to `output.len()` processed interleaved samples into the given buffer.
    /// Returns the number of samples written. Engines only ever hand out whole frames.
    fn pull(&mut self, output: &mut [f32]) -> usize;

    /// Drop all buffered samples, making the engine ready for a new stream.
    fn reset(&mut self);

    /// Change the pitch ratio of the following `push` calls.
    fn set_pitch_ratio(&mut self, ratio: f64);
}

// -------------------------------------------------------------------------------------------------

/// Creates new engine instances for the given specs.
pub type EngineFactory =
    Arc<dyn Fn(&StretchSpecs) -> Result<Box<dyn TimeStretchEngine>, Error> + Send + Sync>;

/// Default engine factory, which creates [`SignalSmithEngine`] instances.
pub fn signalsmith_factory() -> EngineFactory {
    Arc::new(|specs: &StretchSpecs| {
        SignalSmithEngine::new(*specs).map(|engine| Box::new(engine) as Box<dyn TimeStretchEngine>)
    })
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn pitch_ratio() {
        let params = EngineParameters::default();
        assert_abs_diff_eq!(params.pitch_ratio, 0.981_818, epsilon = 1e-6);
        assert_abs_diff_eq!(params.pitch_ratio, 432.0 / 440.0, epsilon = 1e-12);
        assert!(params.pitch_ratio < 1.0 && params.pitch_ratio > 0.9);
    }

    #[test]
    fn pitch_semitones() {
        let params = EngineParameters::default();
        let expected = 12.0 * (432.0f64 / 440.0).log2();
        assert_abs_diff_eq!(params.pitch_semitones(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(params.pitch_semitones(), -0.3177, epsilon = 1e-4);
        // less than a semitone: a subtle retune, not a transpose
        assert!(params.pitch_semitones() < 0.0 && params.pitch_semitones() > -1.0);
        assert_eq!(semitones_from_ratio(1.0), 0.0);
        assert_abs_diff_eq!(semitones_from_ratio(2.0), 12.0, epsilon = 1e-12);
    }

    #[test]
    fn latency_estimate() {
        let params = EngineParameters::default();
        assert_abs_diff_eq!(params.latency_ms(), 16.0);
        assert!(params.latency_ms() <= 20.0);

        let params = EngineParameters {
            sequence_window_ms: 40.0,
            seek_window_ms: 15.0,
            overlap_ms: 8.0,
            ..Default::default()
        };
        assert_abs_diff_eq!(params.latency_ms(), 43.0);
    }

    #[test]
    fn pitch_ratio_validation() {
        assert!(is_valid_pitch_ratio(PITCH_RATIO_432_HZ));
        assert!(is_valid_pitch_ratio(2.0));
        assert!(!is_valid_pitch_ratio(0.0));
        assert!(!is_valid_pitch_ratio(-1.0));
        assert!(!is_valid_pitch_ratio(2.5));
        assert!(!is_valid_pitch_ratio(f64::NAN));
    }
}
