#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod effect;
mod engine;
mod error;
mod pipeline;

// public, flat re-exports
pub use error::Error;

pub use effect::{
    Configuration, DiagnosticKind, DiagnosticValue, Effect, EffectState, SampleFormat,
    CHANNEL_MASK_MONO, CHANNEL_MASK_STEREO,
};
pub use engine::{EngineAdapter, EngineMetrics};
pub use pipeline::{Pipeline, PipelineStats};

// public mods
pub mod abi;
pub mod utils;
