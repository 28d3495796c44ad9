//! An example showcasing how a host drives the retune effect through its C ABI: create an
//! instance, configure and enable it, process a few periods of a 440 Hz sine and read back the
//! effect's diagnostics.

use std::{
    f32::consts::PI,
    ffi::c_void,
    mem::size_of,
    ptr,
};

use retune::abi::{
    AudioBuffer, BufferConfig, CommandCode, EffectConfig, EffectCreate, EffectHandle,
    EffectQueryEffect, EffectRelease, AUDIO_FORMAT_PCM_16_BIT, EFFECT_BUFFER_ACCESS_ACCUMULATE,
    EFFECT_BUFFER_ACCESS_READ, EFFECT_DESCRIPTOR, EFFECT_IMPLEMENTATION_UUID,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Info
};

const SAMPLE_RATE: u32 = 48000;
const CHANNEL_COUNT: usize = 2;
const FRAME_COUNT: usize = 480;
const PERIOD_COUNT: usize = 200;

// -------------------------------------------------------------------------------------------------

fn main() {
    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(DEFAULT_LOG_LEVEL.to_level_filter())
        .init()
        .expect("Failed to set logger");

    // Query the library
    let mut descriptor = EFFECT_DESCRIPTOR;
    check(unsafe { EffectQueryEffect(0, &mut descriptor) }, "EffectQueryEffect");
    log::info!(
        "Found effect '{}' by '{}' ({})",
        descriptor.name(),
        descriptor.implementor(),
        descriptor.uuid
    );

    // Create an instance
    let mut handle: EffectHandle = ptr::null_mut();
    check(
        unsafe { EffectCreate(&EFFECT_IMPLEMENTATION_UUID, 0, 0, &mut handle) },
        "EffectCreate",
    );

    // Configure and enable it
    let buffer_config = |access_mode| BufferConfig {
        sampling_rate: SAMPLE_RATE,
        channels: 0x3,
        format: AUDIO_FORMAT_PCM_16_BIT,
        access_mode,
    };
    let config = EffectConfig {
        input: buffer_config(EFFECT_BUFFER_ACCESS_READ),
        output: buffer_config(EFFECT_BUFFER_ACCESS_ACCUMULATE),
    };
    check(
        command(handle, CommandCode::SetConfig, Some(config)),
        "SET_CONFIG",
    );
    check(
        command(handle, CommandCode::SetEnabled, Some(1u32)),
        "SET_ENABLED",
    );

    // Process a few seconds of a 440 Hz sine
    let mut input = vec![0i16; FRAME_COUNT * CHANNEL_COUNT];
    let mut output = vec![0i16; FRAME_COUNT * CHANNEL_COUNT];
    let mut phase = 0.0f32;
    for _ in 0..PERIOD_COUNT {
        for frame in input.chunks_exact_mut(CHANNEL_COUNT) {
            frame.fill((0.5 * phase.sin() * 32767.0) as i16);
            phase = (phase + 2.0 * PI * 440.0 / SAMPLE_RATE as f32) % (2.0 * PI);
        }
        let mut in_buffer = AudioBuffer {
            frame_count: FRAME_COUNT,
            raw: input.as_mut_ptr() as *mut c_void,
        };
        let mut out_buffer = AudioBuffer {
            frame_count: FRAME_COUNT,
            raw: output.as_mut_ptr() as *mut c_void,
        };
        check(
            unsafe { ((**handle).process)(handle, &mut in_buffer, &mut out_buffer) },
            "process",
        );
    }
    let peak = output.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    log::info!("Processed {PERIOD_COUNT} periods, output peak: {peak}");

    // Read diagnostics
    log::info!("Latency: {:.2} ms", query::<f32>(handle, CommandCode::GetLatencyMs));
    log::info!("CPU: {:.2} %", query::<f32>(handle, CommandCode::GetCpuUsage));
    log::info!(
        "Pitch: {:.6} ({:.4} semitones)",
        query::<f32>(handle, CommandCode::GetPitchRatio),
        query::<f32>(handle, CommandCode::GetPitchSemitones)
    );
    log::info!(
        "Frames: {} processed, {} dropped",
        query::<u64>(handle, CommandCode::GetFramesProcessed),
        query::<u64>(handle, CommandCode::GetFramesDropped)
    );

    // Release it: a second release is rejected
    check(unsafe { EffectRelease(handle) }, "EffectRelease");
    let status = unsafe { EffectRelease(handle) };
    log::info!("Releasing the effect a second time returned {status}");
}

// -------------------------------------------------------------------------------------------------

fn check(status: i32, name: &str) {
    assert_eq!(status, 0, "{name} failed with status {status}");
}

fn command<T: Copy>(handle: EffectHandle, code: CommandCode, payload: Option<T>) -> i32 {
    let mut reply = 0i32;
    let mut reply_size = size_of::<i32>() as u32;
    let (data, size) = match &payload {
        Some(value) => (value as *const T as *mut c_void, size_of::<T>() as u32),
        None => (ptr::null_mut(), 0),
    };
    unsafe {
        ((**handle).command)(
            handle,
            code as u32,
            size,
            data,
            &mut reply_size,
            &mut reply as *mut i32 as *mut c_void,
        )
    }
}

fn query<T: Copy + Default>(handle: EffectHandle, code: CommandCode) -> T {
    let mut reply = T::default();
    let mut reply_size = size_of::<T>() as u32;
    let status = unsafe {
        ((**handle).command)(
            handle,
            code as u32,
            0,
            ptr::null_mut(),
            &mut reply_size,
            &mut reply as *mut T as *mut c_void,
        )
    };
    check(status, &code.to_string());
    reply
}
