use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    utils::{
        buffer::SampleFifo,
        stretcher::{EngineFactory, StretchSpecs, TimeStretchEngine, MAX_FRAME_COUNT},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Deterministic engine for tests: passes samples through unchanged, after withholding the given
/// number of startup frames.
pub struct FakeEngine {
    channel_count: usize,
    latency_frames: usize,
    pending_latency_frames: usize,
    pending_output: SampleFifo,
}

impl FakeEngine {
    pub fn new(specs: &StretchSpecs, latency_frames: usize) -> Self {
        Self {
            channel_count: specs.channel_count,
            latency_frames,
            pending_latency_frames: latency_frames,
            pending_output: SampleFifo::new(2 * MAX_FRAME_COUNT * specs.channel_count),
        }
    }
}

impl TimeStretchEngine for FakeEngine {
    fn push(&mut self, input: &[f32]) {
        let frames = input.len() / self.channel_count;
        let frames_to_skip = self.pending_latency_frames.min(frames);
        self.pending_latency_frames -= frames_to_skip;
        self.pending_output.push(
            &input[frames_to_skip * self.channel_count..frames * self.channel_count],
        );
    }

    fn pull(&mut self, output: &mut [f32]) -> usize {
        let whole_frames = output.len() / self.channel_count * self.channel_count;
        self.pending_output.pop_into(&mut output[..whole_frames])
    }

    fn reset(&mut self) {
        self.pending_output.clear();
        self.pending_latency_frames = self.latency_frames;
    }

    fn set_pitch_ratio(&mut self, _ratio: f64) {
        // pass-through
    }
}

// -------------------------------------------------------------------------------------------------

/// Engine factory which creates [`FakeEngine`]s and counts its invocations.
pub struct FakeEngineFactory {
    latency_frames: usize,
    created: Arc<AtomicUsize>,
    specs: Arc<std::sync::Mutex<Vec<StretchSpecs>>>,
}

impl FakeEngineFactory {
    pub fn new(latency_frames: usize) -> Self {
        Self {
            latency_frames,
            created: Arc::new(AtomicUsize::new(0)),
            specs: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Number of engines created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Specs of all engines created so far.
    pub fn specs(&self) -> Vec<StretchSpecs> {
        self.specs.lock().unwrap().clone()
    }

    pub fn factory(&self) -> EngineFactory {
        let latency_frames = self.latency_frames;
        let created = Arc::clone(&self.created);
        let all_specs = Arc::clone(&self.specs);
        Arc::new(move |specs: &StretchSpecs| {
            created.fetch_add(1, Ordering::AcqRel);
            all_specs.lock().unwrap().push(*specs);
            Ok(Box::new(FakeEngine::new(specs, latency_frames)) as Box<dyn TimeStretchEngine>)
        })
    }

    /// A factory which always fails, as if the engine could not be allocated.
    pub fn failing() -> EngineFactory {
        Arc::new(|_specs: &StretchSpecs| {
            Err(Error::ResourceExhausted("engine allocation failed".into()))
        })
    }
}
