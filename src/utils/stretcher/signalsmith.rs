use crate::{
    utils::{
        buffer::SampleFifo,
        stretcher::{
            semitones_from_ratio, EngineParameters, StretchSpecs, TimeStretchEngine,
            MAX_FRAME_COUNT,
        },
    },
    Error,
};

use signalsmith_stretch::Stretch;

// -------------------------------------------------------------------------------------------------

/// SignalSmith-based pitch shifting engine.
///
/// Input and output lengths are kept equal on every process call, so the engine only transposes
/// and never changes the tempo. The stretcher's own input and output latency is withheld from
/// the very first outputs: those frames only contain the engine's startup fill.
pub struct SignalSmithEngine {
    stretcher: Stretch,
    sample_rate: u32,
    channel_count: usize,
    tonality_limit: Option<f32>,
    // Pre-allocated buffers to avoid allocations in the push and pull methods.
    output_buffer: Vec<f32>,
    pending_output: SampleFifo,
    latency_frames: usize,
    pending_latency_frames: usize,
}

impl SignalSmithEngine {
    pub fn new(specs: StretchSpecs) -> Result<Self, Error> {
        let StretchSpecs {
            sample_rate,
            channel_count,
            params,
        } = specs;

        if sample_rate == 0 || channel_count == 0 {
            return Err(Error::InvalidArgument(format!(
                "Can't create a stretcher for {sample_rate} Hz with {channel_count} channels"
            )));
        }

        // create stretcher
        let mut stretcher = if params.quick_seek_enabled {
            Stretch::preset_cheaper(channel_count as u32, sample_rate)
        } else {
            Stretch::preset_default(channel_count as u32, sample_rate)
        };

        let tonality_limit = Self::tonality_limit(&params, sample_rate);
        stretcher.set_transpose_factor_semitones(params.pitch_semitones() as f32, tonality_limit);

        let latency_frames = stretcher.input_latency() + stretcher.output_latency();
        let pending_latency_frames = latency_frames;

        let output_buffer = vec![0.0; MAX_FRAME_COUNT * channel_count];
        // room for two periods: the host pulls as many frames as it pushes
        let pending_output = SampleFifo::new(2 * MAX_FRAME_COUNT * channel_count);

        log::debug!(
            "Created stretcher: {sample_rate} Hz, {channel_count} channels, \
             {latency_frames} frames startup latency"
        );

        Ok(Self {
            stretcher,
            sample_rate,
            channel_count,
            tonality_limit,
            output_buffer,
            pending_output,
            latency_frames,
            pending_latency_frames,
        })
    }

    /// The engine's internal latency in frames.
    pub fn latency_frames(&self) -> usize {
        self.latency_frames
    }

    fn tonality_limit(params: &EngineParameters, sample_rate: u32) -> Option<f32> {
        if params.anti_alias_filter_enabled {
            Some((EngineParameters::ANTI_ALIAS_CUTOFF_HZ / sample_rate as f32).min(0.5))
        } else {
            None
        }
    }
}

impl TimeStretchEngine for SignalSmithEngine {
    fn push(&mut self, input: &[f32]) {
        for chunk in input.chunks(MAX_FRAME_COUNT * self.channel_count) {
            let frames = chunk.len() / self.channel_count;
            let samples = frames * self.channel_count;
            if frames == 0 {
                continue;
            }

            // Process: same input and output length preserves the tempo
            self.stretcher
                .process(&chunk[..samples], &mut self.output_buffer[..samples]);

            // Skip empty latency buffers with the first process calls
            let frames_to_skip = self.pending_latency_frames.min(frames);
            self.pending_latency_frames -= frames_to_skip;

            self.pending_output
                .push(&self.output_buffer[frames_to_skip * self.channel_count..samples]);
        }
    }

    fn pull(&mut self, output: &mut [f32]) -> usize {
        let whole_frames = output.len() / self.channel_count * self.channel_count;
        self.pending_output.pop_into(&mut output[..whole_frames])
    }

    fn reset(&mut self) {
        self.stretcher.reset();
        self.pending_output.clear();
        self.pending_latency_frames = self.latency_frames;
    }

    fn set_pitch_ratio(&mut self, ratio: f64) {
        let semitones = semitones_from_ratio(ratio);
        self.stretcher
            .set_transpose_factor_semitones(semitones as f32, self.tonality_limit);
        log::debug!(
            "Stretcher at {} Hz now transposes by {semitones:.4} semitones",
            self.sample_rate
        );
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::utils::frequency::dominant_frequency;

    fn sine(frame_count: usize, channel_count: usize, offset: usize) -> Vec<f32> {
        let mut buffer = vec![0.0f32; frame_count * channel_count];
        for (i, frame) in buffer.chunks_exact_mut(channel_count).enumerate() {
            let phase = 2.0 * std::f32::consts::PI * 440.0 * (offset + i) as f32 / 48000.0;
            frame.fill(0.5 * phase.sin());
        }
        buffer
    }

    #[test]
    fn startup_latency_is_withheld() {
        const CHANNEL_COUNT: usize = 2;
        const FRAME_COUNT: usize = 480;

        let specs = StretchSpecs::new(48000, CHANNEL_COUNT, EngineParameters::default());
        let mut engine = SignalSmithEngine::new(specs).unwrap();
        assert!(engine.latency_frames() > 0);

        let mut output = vec![0.0f32; FRAME_COUNT * CHANNEL_COUNT];
        let mut total_pushed = 0;
        let mut total_pulled = 0;
        let mut first_pull = None;

        // Process until we receive some output
        for period in 0..200 {
            let input = sine(FRAME_COUNT, CHANNEL_COUNT, period * FRAME_COUNT);
            engine.push(&input);
            total_pushed += input.len();

            let pulled = engine.pull(&mut output);
            assert_eq!(pulled % CHANNEL_COUNT, 0, "Only whole frames must be pulled");
            first_pull.get_or_insert(pulled);
            total_pulled += pulled;
            if pulled == output.len() && output.iter().any(|s| s.abs() > 0.01) {
                break;
            }
        }

        assert!(first_pull.unwrap() < output.len(), "First pull must be short");
        assert!(total_pulled <= total_pushed);
        assert!(
            output.iter().any(|s| s.abs() > 0.01),
            "Output buffer should contain non-zero data"
        );
    }

    #[test]
    fn retunes_440_to_432_hz() {
        const FRAME_COUNT: usize = 480;
        const ANALYZED_FRAMES: usize = 16384;

        let specs = StretchSpecs::new(48000, 1, EngineParameters::default());
        let mut engine = SignalSmithEngine::new(specs).unwrap();

        let input_frequency = dominant_frequency(&sine(ANALYZED_FRAMES, 1, 0), 48000);
        assert_abs_diff_eq!(input_frequency, 440.0, epsilon = 1.0);

        // one second of audio, streamed in periods
        let mut output = vec![0.0f32; FRAME_COUNT];
        let mut retuned = Vec::with_capacity(48000);
        for period in 0..100 {
            engine.push(&sine(FRAME_COUNT, 1, period * FRAME_COUNT));
            let pulled = engine.pull(&mut output);
            retuned.extend_from_slice(&output[..pulled]);
        }
        assert!(retuned.len() >= ANALYZED_FRAMES + engine.latency_frames());

        // analyze the tail, after the engine settled
        let tail = &retuned[retuned.len() - ANALYZED_FRAMES..];
        let output_frequency = dominant_frequency(tail, 48000);
        assert_abs_diff_eq!(output_frequency, 432.0, epsilon = 1.0);
    }

    #[test]
    fn reset_restarts_the_stream() {
        let specs = StretchSpecs::new(44100, 1, EngineParameters::default());
        let mut engine = SignalSmithEngine::new(specs).unwrap();

        let input = sine(1024, 1, 0);
        let mut output = vec![0.0f32; 1024];
        for _ in 0..100 {
            engine.push(&input);
            engine.pull(&mut output);
        }
        engine.reset();

        // after a reset, the startup latency applies again
        engine.push(&input[..64]);
        assert_eq!(engine.pull(&mut output), 0);
    }

    #[test]
    fn invalid_specs() {
        let params = EngineParameters::default();
        let specs = StretchSpecs {
            sample_rate: 0,
            channel_count: 2,
            params,
        };
        assert!(matches!(
            SignalSmithEngine::new(specs),
            Err(Error::InvalidArgument(_))
        ));
    }
}
