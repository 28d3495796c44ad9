use std::{
    ffi::c_void,
    mem::{offset_of, size_of},
    panic::{catch_unwind, AssertUnwindSafe},
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError,
    },
};

use dashmap::DashSet;

use super::{
    AudioBuffer, BufferConfig, CommandCode, EffectConfig, EffectDescriptor, EffectHandle,
    EffectInterface, EffectUuid, EFFECT_DESCRIPTOR, EFFECT_IMPLEMENTATION_UUID,
};
use crate::{
    effect::{DiagnosticKind, DiagnosticValue, Effect, SampleFormat},
    error::errno,
    pipeline::Pipeline,
    utils::stretcher::MAX_FRAME_COUNT,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Mutable part of an effect instance, guarded by the context's mutex.
struct ContextState {
    effect: Effect,
    config: Option<EffectConfig>,
}

/// Memory behind an [`EffectHandle`].
///
/// The dispatch table pointer must be the very first field: hosts treat the handle as a pointer
/// to it.
#[repr(C)]
pub struct EffectContext {
    itfe: *const EffectInterface,
    state: Mutex<ContextState>,
    // channel count of the applied config, for pass-through copies while the state is locked
    channel_count: AtomicUsize,
}

const _: () = assert!(offset_of!(EffectContext, itfe) == 0);

impl EffectContext {
    fn new(effect: Effect) -> Self {
        Self {
            itfe: &EFFECT_INTERFACE,
            state: Mutex::new(ContextState {
                effect,
                config: None,
            }),
            channel_count: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -------------------------------------------------------------------------------------------------

/// Dispatch table which is shared by all effect instances.
pub static EFFECT_INTERFACE: EffectInterface = EffectInterface {
    process: effect_process,
    command: effect_command,
    get_descriptor: effect_get_descriptor,
    process_reverse: effect_process_reverse,
};

/// Addresses of all live effect contexts.
fn live_handles() -> &'static DashSet<usize> {
    static LIVE_HANDLES: OnceLock<DashSet<usize>> = OnceLock::new();
    LIVE_HANDLES.get_or_init(DashSet::new)
}

/// Resolve a handle, rejecting unknown and released ones.
///
/// # Safety
/// The handle must not get released while the returned reference is in use.
unsafe fn live_context<'a>(handle: EffectHandle) -> Result<&'a EffectContext, Error> {
    if handle.is_null() || !live_handles().contains(&(handle as usize)) {
        return Err(Error::InvalidArgument("Unknown or released effect handle".into()));
    }
    Ok(&*(handle as *const EffectContext))
}

// -------------------------------------------------------------------------------------------------

/// Run an entry point, mapping errors and panics to status codes. Errors get logged.
fn guarded<F: FnOnce() -> Result<(), Error>>(name: &str, func: F) -> i32 {
    match catch_unwind(AssertUnwindSafe(func)) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            log::warn!("{name} failed: {err}");
            err.status()
        }
        Err(payload) => {
            log::error!(
                "Ouch. {name} panicked: {}",
                panic_message::panic_message(&payload)
            );
            -errno::EINVAL
        }
    }
}

/// Real-time variant of [`guarded`]: errors are only reported via the status.
fn guarded_realtime<F: FnOnce() -> Result<(), Error>>(func: F) -> i32 {
    match catch_unwind(AssertUnwindSafe(func)) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => err.status(),
        Err(payload) => {
            log::error!(
                "Ouch. process panicked: {}",
                panic_message::panic_message(&payload)
            );
            -errno::EINVAL
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Raw command payload.
struct Payload {
    data: *const c_void,
    size: u32,
}

impl Payload {
    unsafe fn read<T: Copy>(&self, command: CommandCode) -> Result<T, Error> {
        if self.data.is_null() || (self.size as usize) < size_of::<T>() {
            return Err(Error::InvalidArgument(format!(
                "Invalid payload for command {command}"
            )));
        }
        Ok(ptr::read_unaligned(self.data as *const T))
    }
}

/// Raw command reply buffer.
struct Reply {
    data: *mut c_void,
    size: *mut u32,
}

impl Reply {
    fn capacity(&self) -> usize {
        if self.data.is_null() || self.size.is_null() {
            0
        } else {
            unsafe { *self.size as usize }
        }
    }

    unsafe fn write<T: Copy>(&mut self, command: CommandCode, value: T) -> Result<(), Error> {
        if self.capacity() < size_of::<T>() {
            return Err(Error::InvalidArgument(format!(
                "Reply buffer too small for command {command}"
            )));
        }
        ptr::write_unaligned(self.data as *mut T, value);
        *self.size = size_of::<T>() as u32;
        Ok(())
    }

    /// Write a status reply, if the host asked for one.
    unsafe fn write_status(&mut self, status: i32) {
        if self.capacity() >= size_of::<i32>() {
            ptr::write_unaligned(self.data as *mut i32, status);
            *self.size = size_of::<i32>() as u32;
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn apply_config(state: &mut ContextState, config: &EffectConfig) -> Result<usize, Error> {
    let EffectConfig { input, output } = config;
    if input.sampling_rate != output.sampling_rate
        || input.channels != output.channels
        || input.format != output.format
    {
        return Err(Error::InvalidArgument(
            "Input and output buffer configs must match".into(),
        ));
    }
    let format = SampleFormat::from_code(input.format)?;
    state
        .effect
        .configure(input.sampling_rate, input.channels, format)?;
    state.config = Some(*config);
    Ok(state.effect.channel_count().unwrap_or(0))
}

fn diagnostic(
    state: &ContextState,
    reply: &mut Reply,
    command: CommandCode,
    kind: DiagnosticKind,
) -> Result<(), Error> {
    match state.effect.diagnostic(kind)? {
        DiagnosticValue::Float(value) => unsafe { reply.write(command, value) },
        DiagnosticValue::Count(value) => unsafe { reply.write(command, value) },
    }
}

fn dispatch(
    context: &EffectContext,
    command: CommandCode,
    payload: &Payload,
    reply: &mut Reply,
) -> Result<(), Error> {
    let mut state = context.lock();
    match command {
        CommandCode::Init => state.effect.reset(),
        CommandCode::SetConfig => {
            let config = unsafe { payload.read::<EffectConfig>(command)? };
            let channel_count = apply_config(&mut state, &config)?;
            context.channel_count.store(channel_count, Ordering::Release);
            Ok(())
        }
        CommandCode::GetConfig => {
            let config = state
                .config
                .ok_or_else(|| Error::NotReady("Effect is not configured".into()))?;
            unsafe { reply.write(command, config) }
        }
        CommandCode::Reset => state.effect.reset(),
        CommandCode::Enable => state.effect.set_enabled(true),
        CommandCode::Disable => state.effect.set_enabled(false),
        CommandCode::SetEnabled => {
            let enabled = unsafe { payload.read::<u32>(command)? };
            state.effect.set_enabled(enabled != 0)
        }
        CommandCode::SetPitchRatio => {
            let ratio = unsafe { payload.read::<f32>(command)? };
            state.effect.set_pitch_ratio(ratio as f64)
        }
        CommandCode::ResetStats => state.effect.reset_stats(),
        CommandCode::GetLatencyMs => diagnostic(&state, reply, command, DiagnosticKind::LatencyMs),
        CommandCode::GetCpuUsage => diagnostic(&state, reply, command, DiagnosticKind::CpuUsage),
        CommandCode::GetPitchRatio => {
            diagnostic(&state, reply, command, DiagnosticKind::PitchRatio)
        }
        CommandCode::GetPitchSemitones => {
            diagnostic(&state, reply, command, DiagnosticKind::PitchSemitones)
        }
        CommandCode::GetFramesProcessed => {
            diagnostic(&state, reply, command, DiagnosticKind::FramesProcessed)
        }
        CommandCode::GetFramesDropped => {
            diagnostic(&state, reply, command, DiagnosticKind::FramesDropped)
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Process the input buffer into the output buffer, or in place when no output buffer is given
/// or both buffers share their memory.
///
/// # Safety
/// Both buffers must hold `frame_count` frames of interleaved PCM16 samples in the configured
/// channel layout. Must not be called concurrently with `EffectRelease` for the same handle.
unsafe extern "C" fn effect_process(
    handle: EffectHandle,
    input: *mut AudioBuffer,
    output: *mut AudioBuffer,
) -> i32 {
    guarded_realtime(|| {
        if handle.is_null() || input.is_null() || (*input).raw.is_null() {
            return Err(Error::InvalidArgument("Invalid process arguments".into()));
        }
        let context = &*(handle as *const EffectContext);
        let input = *input;
        let output = if output.is_null() || (*output).raw.is_null() {
            input
        } else {
            *output
        };
        let frame_count = input.frame_count;
        if output.frame_count < frame_count || frame_count > MAX_FRAME_COUNT {
            return Err(Error::InvalidArgument("Invalid frame count".into()));
        }
        if frame_count == 0 {
            return Ok(());
        }

        let in_place = input.raw == output.raw;
        let mut state = match context.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // busy with a command: pass through
                let channel_count = context.channel_count.load(Ordering::Acquire);
                if channel_count == 0 {
                    return Err(Error::NotReady("Effect is not configured".into()));
                }
                if !in_place {
                    ptr::copy_nonoverlapping(
                        input.raw as *const i16,
                        output.raw as *mut i16,
                        frame_count * channel_count,
                    );
                }
                return Ok(());
            }
        };

        let Some(channel_count) = state.effect.channel_count() else {
            return Err(Error::NotReady("Effect is not configured".into()));
        };
        let sample_count = frame_count * channel_count;
        if in_place {
            let buffer = std::slice::from_raw_parts_mut(output.raw as *mut i16, sample_count);
            state.effect.process_in_place(buffer, frame_count)
        } else {
            let input = std::slice::from_raw_parts(input.raw as *const i16, sample_count);
            let output = std::slice::from_raw_parts_mut(output.raw as *mut i16, sample_count);
            state.effect.process(input, output, frame_count)
        }
    })
}

/// # Safety
/// Payload and reply pointers must be valid for their given sizes.
unsafe extern "C" fn effect_command(
    handle: EffectHandle,
    code: u32,
    command_size: u32,
    command_data: *mut c_void,
    reply_size: *mut u32,
    reply_data: *mut c_void,
) -> i32 {
    let Some(command) = CommandCode::from_repr(code) else {
        log::warn!("Unknown effect command {code:#x}");
        return -errno::EINVAL;
    };
    let payload = Payload {
        data: command_data,
        size: command_size,
    };
    let mut reply = Reply {
        data: reply_data,
        size: reply_size,
    };
    let status = guarded(&format!("Command {command}"), || {
        let context = live_context(handle)?;
        dispatch(context, command, &payload, &mut reply)
    });
    if command.replies_status() {
        reply.write_status(status);
    }
    status
}

/// # Safety
/// The descriptor pointer must be valid for writes.
unsafe extern "C" fn effect_get_descriptor(
    handle: EffectHandle,
    descriptor: *mut EffectDescriptor,
) -> i32 {
    guarded("get_descriptor", || {
        live_context(handle)?;
        if descriptor.is_null() {
            return Err(Error::InvalidArgument("Invalid descriptor pointer".into()));
        }
        ptr::write_unaligned(descriptor, EFFECT_DESCRIPTOR);
        Ok(())
    })
}

unsafe extern "C" fn effect_process_reverse(
    _handle: EffectHandle,
    _input: *mut AudioBuffer,
    _output: *mut AudioBuffer,
) -> i32 {
    Error::NotImplemented.status()
}

// -------------------------------------------------------------------------------------------------

/// Create a new effect instance which processes via the given pipeline and register its handle.
fn create_context(
    uuid: &EffectUuid,
    session_id: i32,
    io_id: i32,
    pipeline: Arc<Pipeline>,
) -> Result<EffectHandle, Error> {
    let effect = Effect::create(uuid, session_id, io_id, pipeline)?;
    let context = Box::into_raw(Box::new(EffectContext::new(effect)));
    live_handles().insert(context as usize);
    Ok(context as EffectHandle)
}

/// Create a new effect instance and return its handle.
///
/// # Safety
/// `uuid` must point to a valid id, `handle` must be valid for writes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectCreate(
    uuid: *const EffectUuid,
    session_id: i32,
    io_id: i32,
    handle: *mut EffectHandle,
) -> i32 {
    guarded("EffectCreate", || {
        if uuid.is_null() || handle.is_null() {
            return Err(Error::InvalidArgument("Invalid create arguments".into()));
        }
        *handle = create_context(&*uuid, session_id, io_id, Pipeline::shared())?;
        Ok(())
    })
}

/// Release an effect instance. Releasing a handle twice fails with `-EINVAL`.
///
/// # Safety
/// The host must not call any other function of the instance while or after releasing it.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectRelease(handle: EffectHandle) -> i32 {
    guarded("EffectRelease", || {
        if handle.is_null() || live_handles().remove(&(handle as usize)).is_none() {
            return Err(Error::InvalidArgument(
                "Unknown or already released effect handle".into(),
            ));
        }
        let context = Box::from_raw(handle as *mut EffectContext);
        let result = context.lock().effect.release();
        drop(context);
        result
    })
}

/// Get the descriptor of the effect with the given implementation id.
///
/// # Safety
/// `uuid` must point to a valid id, `descriptor` must be valid for writes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectGetDescriptor(
    uuid: *const EffectUuid,
    descriptor: *mut EffectDescriptor,
) -> i32 {
    guarded("EffectGetDescriptor", || {
        if uuid.is_null() || descriptor.is_null() {
            return Err(Error::InvalidArgument("Invalid descriptor arguments".into()));
        }
        if *uuid != EFFECT_IMPLEMENTATION_UUID {
            return Err(Error::NotFound);
        }
        ptr::write_unaligned(descriptor, EFFECT_DESCRIPTOR);
        Ok(())
    })
}

/// Number of effects this library provides.
///
/// # Safety
/// `count` must be valid for writes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectQueryNumberEffects(count: *mut u32) -> i32 {
    guarded("EffectQueryNumberEffects", || {
        if count.is_null() {
            return Err(Error::InvalidArgument("Invalid count pointer".into()));
        }
        *count = 1;
        Ok(())
    })
}

/// Get the descriptor of the effect at the given index.
///
/// # Safety
/// `descriptor` must be valid for writes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EffectQueryEffect(index: u32, descriptor: *mut EffectDescriptor) -> i32 {
    guarded("EffectQueryEffect", || {
        if descriptor.is_null() {
            return Err(Error::InvalidArgument("Invalid descriptor pointer".into()));
        }
        if index > 0 {
            return Err(Error::NotFound);
        }
        ptr::write_unaligned(descriptor, EFFECT_DESCRIPTOR);
        Ok(())
    })
}

// Keep the buffer config layout in sync with the host's expectations.
const _: () = assert!(size_of::<BufferConfig>() == 12);

// -------------------------------------------------------------------------------------------------
