use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Linux `errno` values, as used by the audio effect ABI status codes.
pub(crate) mod errno {
    pub const ENOENT: i32 = 2;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENODATA: i32 = 61;
    pub const EOPNOTSUPP: i32 = 95;
}

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by retune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown effect id, malformed buffer or command payloads, or a released handle.
    InvalidArgument(String),
    /// An operation got invoked before its required lifecycle state was reached.
    NotReady(String),
    /// Sample format or channel layout which can't be processed.
    UnsupportedConfiguration(String),
    /// The time-stretch engine could not be allocated.
    ResourceExhausted(String),
    /// Effect index or id does not exist.
    NotFound,
    /// Operation is not implemented by this effect.
    NotImplemented,
}

impl Error {
    /// Negative `errno` style status code, as returned to the host through the C ABI.
    pub fn status(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -errno::EINVAL,
            Self::NotReady(_) => -errno::ENODATA,
            Self::UnsupportedConfiguration(_) => -errno::EOPNOTSUPP,
            Self::ResourceExhausted(_) => -errno::ENOMEM,
            Self::NotFound => -errno::ENOENT,
            Self::NotImplemented => -errno::ENOSYS,
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(str) => write!(f, "Invalid argument: {str}"),
            Self::NotReady(str) => write!(f, "Effect not ready: {str}"),
            Self::UnsupportedConfiguration(str) => write!(f, "Unsupported configuration: {str}"),
            Self::ResourceExhausted(str) => write!(f, "Failed to allocate resources: {str}"),
            Self::NotFound => write!(f, "Effect not found"),
            Self::NotImplemented => write!(f, "Operation is not implemented"),
        }
    }
}

// -------------------------------------------------------------------------------------------------
