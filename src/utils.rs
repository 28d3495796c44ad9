//! Sample conversion, buffer and time-stretching helpers used by the retune pipeline.

pub mod buffer;
pub mod pcm;
pub mod stretcher;

#[cfg(test)]
pub(crate) mod frequency;
