use std::sync::Arc;

use crate::{
    abi::{EffectUuid, EFFECT_IMPLEMENTATION_UUID},
    pipeline::Pipeline,
    utils::{buffer::copy_buffers, stretcher::MAX_FRAME_COUNT},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Lifecycle state of an [`Effect`] instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum EffectState {
    Uninitialized,
    Created,
    Configured,
    Enabled,
    Disabled,
    Released,
}

// -------------------------------------------------------------------------------------------------

/// Sample format of the host's audio buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum SampleFormat {
    #[strum(to_string = "PCM16")]
    Pcm16 = 0x1,
    #[strum(to_string = "float")]
    Float = 0x5,
}

impl SampleFormat {
    /// Map an ABI audio format code.
    pub fn from_code(code: u8) -> Result<Self, Error> {
        Self::from_repr(code).ok_or_else(|| {
            Error::UnsupportedConfiguration(format!("Unknown audio format code {code:#x}"))
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Channel mask of a mono buffer.
pub const CHANNEL_MASK_MONO: u32 = 0x1;
/// Channel mask of an interleaved left/right buffer.
pub const CHANNEL_MASK_STEREO: u32 = 0x3;

/// Applied buffer format of a configured effect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub sample_rate: u32,
    pub channel_count: usize,
    pub sample_format: SampleFormat,
}

impl Configuration {
    /// Validate a host buffer format. Only mono or stereo PCM16 buffers are supported.
    pub fn new(sample_rate: u32, channel_mask: u32, format: SampleFormat) -> Result<Self, Error> {
        if format != SampleFormat::Pcm16 {
            return Err(Error::UnsupportedConfiguration(format!(
                "{format} samples are not supported"
            )));
        }
        let channel_count = match channel_mask {
            CHANNEL_MASK_MONO => 1,
            CHANNEL_MASK_STEREO => 2,
            _ => {
                return Err(Error::UnsupportedConfiguration(format!(
                    "Channel mask {channel_mask:#x} is not supported"
                )))
            }
        };
        if sample_rate == 0 {
            return Err(Error::InvalidArgument("Sample rate must not be 0".into()));
        }
        Ok(Self {
            sample_rate,
            channel_count,
            sample_format: format,
        })
    }

    /// ABI channel mask of this configuration.
    pub fn channel_mask(&self) -> u32 {
        if self.channel_count == 1 {
            CHANNEL_MASK_MONO
        } else {
            CHANNEL_MASK_STEREO
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Diagnostics an effect can be queried for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum DiagnosticKind {
    LatencyMs,
    CpuUsage,
    PitchRatio,
    PitchSemitones,
    FramesProcessed,
    FramesDropped,
}

/// Value of a [`DiagnosticKind`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DiagnosticValue {
    Float(f32),
    Count(u64),
}

// -------------------------------------------------------------------------------------------------

/// A single effect instance, as created by the host for an audio session.
///
/// Instances are lightweight: they track their lifecycle state and buffer configuration, while
/// the pitch-shifting engine is owned by the shared [`Pipeline`].
pub struct Effect {
    state: EffectState,
    pipeline: Arc<Pipeline>,
    session_id: i32,
    io_id: i32,
    config: Option<Configuration>,
}

impl Effect {
    /// Create a new effect instance for the given effect implementation id.
    pub fn create(
        uuid: &EffectUuid,
        session_id: i32,
        io_id: i32,
        pipeline: Arc<Pipeline>,
    ) -> Result<Self, Error> {
        if *uuid != EFFECT_IMPLEMENTATION_UUID {
            return Err(Error::InvalidArgument(format!("Unknown effect id {uuid}")));
        }
        let mut effect = Self {
            state: EffectState::Uninitialized,
            pipeline,
            session_id,
            io_id,
            config: None,
        };
        effect.transition(EffectState::Created);
        Ok(effect)
    }

    pub fn state(&self) -> EffectState {
        self.state
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn io_id(&self) -> i32 {
        self.io_id
    }

    /// The applied buffer format, if the effect got configured.
    pub fn configuration(&self) -> Option<Configuration> {
        self.config
    }

    pub fn channel_count(&self) -> Option<usize> {
        self.config.map(|config| config.channel_count)
    }

    /// Apply a buffer format and construct (or reconfigure) the pipeline's engine.
    ///
    /// On errors, the effect's state and configuration stay unchanged.
    pub fn configure(
        &mut self,
        sample_rate: u32,
        channel_mask: u32,
        format: SampleFormat,
    ) -> Result<(), Error> {
        self.ensure_state(
            &[EffectState::Created, EffectState::Configured],
            "configure",
        )?;
        let config = Configuration::new(sample_rate, channel_mask, format)?;
        if !self
            .pipeline
            .initialize(config.sample_rate, config.channel_count)?
        {
            self.pipeline
                .reconfigure(config.sample_rate, config.channel_count)?;
        }
        self.config = Some(config);
        self.transition(EffectState::Configured);
        Ok(())
    }

    /// Toggle processing. Disabling drops all samples buffered in the engine.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        self.ensure_state(
            &[
                EffectState::Configured,
                EffectState::Enabled,
                EffectState::Disabled,
            ],
            "enable or disable",
        )?;
        self.pipeline.set_enabled(enabled);
        if enabled {
            self.transition(EffectState::Enabled);
        } else {
            self.pipeline.reset_engine();
            self.transition(EffectState::Disabled);
        }
        Ok(())
    }

    /// Drop all samples buffered in the engine.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.ensure_not_released()?;
        self.pipeline.reset_engine();
        Ok(())
    }

    pub fn set_pitch_ratio(&mut self, ratio: f64) -> Result<(), Error> {
        self.ensure_not_released()?;
        self.pipeline.set_pitch_ratio(ratio)
    }

    pub fn reset_stats(&mut self) -> Result<(), Error> {
        self.ensure_not_released()?;
        self.pipeline.reset_stats();
        Ok(())
    }

    /// Copy `frame_count` interleaved frames from input to output, pitch-shifting the output
    /// when the effect is enabled.
    ///
    /// A pipeline which can't process the period (disabled, busy being reconfigured, or running
    /// with another instance's format) passes the input through unchanged.
    pub fn process(
        &mut self,
        input: &[i16],
        output: &mut [i16],
        frame_count: usize,
    ) -> Result<(), Error> {
        let sample_count = self.validate_process_args(input.len(), output.len(), frame_count)?;
        if sample_count == 0 {
            return Ok(());
        }
        copy_buffers(&mut output[..sample_count], &input[..sample_count]);
        self.process_enabled(output, frame_count);
        Ok(())
    }

    /// Same as [`process`](Self::process), but with a single buffer which is used as input and
    /// output.
    pub fn process_in_place(&mut self, buffer: &mut [i16], frame_count: usize) -> Result<(), Error> {
        let sample_count = self.validate_process_args(buffer.len(), buffer.len(), frame_count)?;
        if sample_count > 0 {
            self.process_enabled(buffer, frame_count);
        }
        Ok(())
    }

    /// Query a diagnostic value. An uninitialized pipeline reports zeros.
    pub fn diagnostic(&self, kind: DiagnosticKind) -> Result<DiagnosticValue, Error> {
        self.ensure_state(
            &[
                EffectState::Created,
                EffectState::Configured,
                EffectState::Enabled,
                EffectState::Disabled,
            ],
            "query diagnostics",
        )?;
        let value = match kind {
            DiagnosticKind::LatencyMs => DiagnosticValue::Float(self.pipeline.stats().latency_ms),
            DiagnosticKind::CpuUsage => DiagnosticValue::Float(self.pipeline.stats().cpu_percent),
            DiagnosticKind::PitchRatio => DiagnosticValue::Float(self.pipeline.pitch_ratio() as f32),
            DiagnosticKind::PitchSemitones => {
                DiagnosticValue::Float(self.pipeline.pitch_semitones() as f32)
            }
            DiagnosticKind::FramesProcessed => {
                DiagnosticValue::Count(self.pipeline.stats().frames_processed)
            }
            DiagnosticKind::FramesDropped => {
                DiagnosticValue::Count(self.pipeline.stats().frames_dropped)
            }
        };
        Ok(value)
    }

    /// Release the instance. The shared pipeline keeps its engine for other instances.
    pub fn release(&mut self) -> Result<(), Error> {
        self.ensure_not_released()?;
        self.transition(EffectState::Released);
        Ok(())
    }

    fn process_enabled(&self, buffer: &mut [i16], frame_count: usize) {
        if let (EffectState::Enabled, Some(config)) = (self.state, self.config) {
            self.pipeline.process_in_place_with_format(
                buffer,
                frame_count,
                config.sample_rate,
                config.channel_count,
            );
        }
    }

    fn validate_process_args(
        &self,
        input_len: usize,
        output_len: usize,
        frame_count: usize,
    ) -> Result<usize, Error> {
        self.ensure_state(
            &[
                EffectState::Configured,
                EffectState::Enabled,
                EffectState::Disabled,
            ],
            "process",
        )?;
        if frame_count == 0 {
            return Ok(0);
        }
        if frame_count > MAX_FRAME_COUNT {
            return Err(Error::InvalidArgument(format!(
                "Frame count {frame_count} exceeds {MAX_FRAME_COUNT}"
            )));
        }
        let channel_count = self.channel_count().unwrap_or(1);
        let sample_count = frame_count * channel_count;
        if input_len < sample_count || output_len < sample_count {
            return Err(Error::InvalidArgument(format!(
                "Buffers too small for {frame_count} frames"
            )));
        }
        Ok(sample_count)
    }

    fn ensure_state(&self, allowed: &[EffectState], operation: &str) -> Result<(), Error> {
        if self.state == EffectState::Released {
            return Err(Error::InvalidArgument(format!(
                "Can't {operation}: effect got released"
            )));
        }
        if !allowed.contains(&self.state) {
            return Err(Error::NotReady(format!(
                "Can't {operation} in state '{}'",
                self.state
            )));
        }
        Ok(())
    }

    fn ensure_not_released(&self) -> Result<(), Error> {
        if self.state == EffectState::Released {
            return Err(Error::InvalidArgument("Effect got released".into()));
        }
        Ok(())
    }

    fn transition(&mut self, state: EffectState) {
        if self.state != state {
            log::info!(
                "Effect (session {}, io {}): {} -> {}",
                self.session_id,
                self.io_id,
                self.state,
                state
            );
            self.state = state;
        }
    }
}

// -------------------------------------------------------------------------------------------------
