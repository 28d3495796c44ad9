//! C audio effect ABI: `#[repr(C)]` types, command codes and the exported entry points.
//!
//! The layout follows the Android audio effect library interface, so the compiled `cdylib` can
//! be loaded by a generic effect host without knowing anything about its internals.

use std::{
    ffi::{c_char, c_void},
    fmt,
};

mod interface;

pub use interface::{
    EffectContext, EffectCreate, EffectGetDescriptor, EffectQueryEffect,
    EffectQueryNumberEffects, EffectRelease, EFFECT_INTERFACE,
};

// -------------------------------------------------------------------------------------------------

/// Binary effect type or implementation id.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EffectUuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq: u16,
    pub node: [u8; 6],
}

impl fmt::Display for EffectUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-",
            self.time_low, self.time_mid, self.time_hi_and_version, self.clock_seq
        )?;
        for byte in self.node {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Effect type id: a generic insert effect.
pub const EFFECT_TYPE_UUID: EffectUuid = EffectUuid {
    time_low: 0x7b49_1460,
    time_mid: 0x8d4d,
    time_hi_and_version: 0x11e0,
    clock_seq: 0xbd6a,
    node: [0x00, 0x02, 0xa5, 0xd5, 0xc5, 0x1b],
};

/// Implementation id of the retune effect.
pub const EFFECT_IMPLEMENTATION_UUID: EffectUuid = EffectUuid {
    time_low: 0xf1a2_b3c4,
    time_mid: 0x5678,
    time_hi_and_version: 0x90ab,
    clock_seq: 0xcdef,
    node: [0x01, 0x23, 0x45, 0x67, 0x89, 0xab],
};

// -------------------------------------------------------------------------------------------------

/// Size of the NUL-terminated strings in an [`EffectDescriptor`].
pub const EFFECT_STRING_LEN: usize = 64;

pub const EFFECT_CONTROL_API_VERSION: u32 = 0x0003;

pub const EFFECT_FLAG_TYPE_INSERT: u32 = 0x0000_0001;
pub const EFFECT_FLAG_INSERT_LAST: u32 = 0x0000_0040;
pub const EFFECT_FLAG_DEVICE_IND: u32 = 0x0000_0800;
pub const EFFECT_FLAG_AUDIO_MODE_IND: u32 = 0x0000_1000;

/// Static metadata of an effect, as queried by hosts before creating instances.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    pub type_uuid: EffectUuid,
    pub uuid: EffectUuid,
    pub api_version: u32,
    pub flags: u32,
    /// Estimated CPU load in 0.1 MIPS units.
    pub cpu_load: u16,
    /// Estimated memory usage in KB.
    pub memory_usage: u16,
    pub name: [c_char; EFFECT_STRING_LEN],
    pub implementor: [c_char; EFFECT_STRING_LEN],
}

impl EffectDescriptor {
    /// The descriptor's name as Rust string.
    pub fn name(&self) -> String {
        Self::to_string_lossy(&self.name)
    }

    /// The descriptor's implementor as Rust string.
    pub fn implementor(&self) -> String {
        Self::to_string_lossy(&self.implementor)
    }

    fn to_string_lossy(chars: &[c_char]) -> String {
        let bytes = chars
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect::<Vec<_>>();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Descriptor of the one and only effect this library provides.
pub const EFFECT_DESCRIPTOR: EffectDescriptor = EffectDescriptor {
    type_uuid: EFFECT_TYPE_UUID,
    uuid: EFFECT_IMPLEMENTATION_UUID,
    api_version: EFFECT_CONTROL_API_VERSION,
    flags: EFFECT_FLAG_TYPE_INSERT
        | EFFECT_FLAG_INSERT_LAST
        | EFFECT_FLAG_DEVICE_IND
        | EFFECT_FLAG_AUDIO_MODE_IND,
    cpu_load: 500,
    memory_usage: 32,
    name: c_string("Retune 432 Hz"),
    implementor: c_string("retune"),
};

const fn c_string(str: &str) -> [c_char; EFFECT_STRING_LEN] {
    let bytes = str.as_bytes();
    assert!(bytes.len() < EFFECT_STRING_LEN, "String too long");
    let mut chars = [0 as c_char; EFFECT_STRING_LEN];
    let mut i = 0;
    while i < bytes.len() {
        chars[i] = bytes[i] as c_char;
        i += 1;
    }
    chars
}

// -------------------------------------------------------------------------------------------------

/// Sample format code of 16-bit signed PCM buffers.
pub const AUDIO_FORMAT_PCM_16_BIT: u8 = 0x1;
/// Sample format code of 32-bit float buffers.
pub const AUDIO_FORMAT_PCM_FLOAT: u8 = 0x5;

pub const EFFECT_BUFFER_ACCESS_WRITE: u8 = 0;
pub const EFFECT_BUFFER_ACCESS_READ: u8 = 1;
pub const EFFECT_BUFFER_ACCESS_ACCUMULATE: u8 = 2;

/// Format of a single host buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub sampling_rate: u32,
    /// Channel mask: `0x1` mono, `0x3` stereo.
    pub channels: u32,
    pub format: u8,
    pub access_mode: u8,
}

/// Payload of the `SET_CONFIG` and `GET_CONFIG` commands.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EffectConfig {
    pub input: BufferConfig,
    pub output: BufferConfig,
}

/// Interleaved audio buffer, as passed to the process functions.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct AudioBuffer {
    pub frame_count: usize,
    pub raw: *mut c_void,
}

// -------------------------------------------------------------------------------------------------

/// Opaque instance handle, as seen by hosts: a pointer to the instance's dispatch table pointer.
pub type EffectHandle = *mut *const EffectInterface;

/// Per-instance dispatch table.
#[repr(C)]
pub struct EffectInterface {
    pub process: unsafe extern "C" fn(
        handle: EffectHandle,
        input: *mut AudioBuffer,
        output: *mut AudioBuffer,
    ) -> i32,
    pub command: unsafe extern "C" fn(
        handle: EffectHandle,
        code: u32,
        command_size: u32,
        command_data: *mut c_void,
        reply_size: *mut u32,
        reply_data: *mut c_void,
    ) -> i32,
    pub get_descriptor:
        unsafe extern "C" fn(handle: EffectHandle, descriptor: *mut EffectDescriptor) -> i32,
    pub process_reverse: unsafe extern "C" fn(
        handle: EffectHandle,
        input: *mut AudioBuffer,
        output: *mut AudioBuffer,
    ) -> i32,
}

// -------------------------------------------------------------------------------------------------

/// First command code of the effect specific commands.
pub const EFFECT_CMD_FIRST_PROPRIETARY: u32 = 0x10000;

/// Command codes, as accepted by the dispatch table's `command` function.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u32)]
pub enum CommandCode {
    Init = 0,
    /// Payload: [`EffectConfig`]. Reply: `i32` status.
    SetConfig = 1,
    Reset = 2,
    Enable = 3,
    Disable = 4,
    /// Reply: [`EffectConfig`].
    GetConfig = 14,
    /// Payload: `u32` bool.
    SetEnabled = EFFECT_CMD_FIRST_PROPRIETARY,
    /// Payload: `f32` frequency ratio in range `(0, 2]`.
    SetPitchRatio = EFFECT_CMD_FIRST_PROPRIETARY + 1,
    /// Reply: `f32`.
    GetLatencyMs = EFFECT_CMD_FIRST_PROPRIETARY + 2,
    /// Reply: `f32`.
    GetCpuUsage = EFFECT_CMD_FIRST_PROPRIETARY + 3,
    ResetStats = EFFECT_CMD_FIRST_PROPRIETARY + 4,
    /// Reply: `f32`.
    GetPitchRatio = EFFECT_CMD_FIRST_PROPRIETARY + 5,
    /// Reply: `f32`.
    GetPitchSemitones = EFFECT_CMD_FIRST_PROPRIETARY + 6,
    /// Reply: `u64`.
    GetFramesProcessed = EFFECT_CMD_FIRST_PROPRIETARY + 7,
    /// Reply: `u64`.
    GetFramesDropped = EFFECT_CMD_FIRST_PROPRIETARY + 8,
}

impl CommandCode {
    /// Returns true for commands which report their status via an `i32` reply.
    pub fn replies_status(&self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::SetConfig
                | Self::Enable
                | Self::Disable
                | Self::SetEnabled
                | Self::SetPitchRatio
        )
    }
}

// -------------------------------------------------------------------------------------------------
