//! Error types for memhook.
//!
//! - [`MemHookError`] - Errors reported by handler registration
//! - [`Status`] - The same outcome as a C-compatible status code
//! - [`ConfigError`] - Malformed configuration values

use crate::event::EventType;
use thiserror::Error;

/// Errors returned by registration.
///
/// Dispatch never fails in this sense: it always returns the result of the
/// genuine or emulated primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemHookError {
    /// The request was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The event mask contains bits that do not name an event.
    #[error("unknown event bits {0:#x}")]
    UnknownEvents(u32),

    /// Allocating the entry or the new chain snapshot failed.
    #[error("out of memory while installing event handler")]
    OutOfMemory,

    /// The events were disabled by configuration.
    #[error("events {0:?} are not supported by the current configuration")]
    Unsupported(EventType),
}

impl MemHookError {
    /// The status code for this error.
    pub fn status(&self) -> Status {
        Status::from(self)
    }
}

/// C-compatible status codes, numbered like the UCS status values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// Allocation failed.
    OutOfMemory = -4,
    /// Malformed arguments.
    InvalidArgument = -5,
    /// Disabled or unsupported events.
    Unsupported = -22,
}

impl From<&MemHookError> for Status {
    fn from(err: &MemHookError) -> Self {
        match err {
            MemHookError::InvalidArgument(_) | MemHookError::UnknownEvents(_) => {
                Status::InvalidArgument
            }
            MemHookError::OutOfMemory => Status::OutOfMemory,
            MemHookError::Unsupported(_) => Status::Unsupported,
        }
    }
}

impl From<Result<(), MemHookError>> for Status {
    fn from(result: Result<(), MemHookError>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(err) => Status::from(&err),
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A boolean variable held something other than a boolean.
    #[error("{var}: expected a boolean, got {value:?}")]
    InvalidBool {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// An event list named an unknown event.
    #[error("{var}: unknown event {name:?}")]
    UnknownEvent {
        /// Variable name.
        var: &'static str,
        /// Offending entry.
        name: String,
    },
}
