//! # memhook-core
//!
//! Core types for the memhook address-space event engine.
//!
//! This crate has minimal dependencies and is meant to be imported by code
//! that only writes handlers, without pulling in the registry and dispatch
//! machinery of `memhook-std`.
//!
//! # Events
//!
//! - [`EventType`] - bit set of event types (six native, two aggregate)
//! - [`Event`] - the record handed to handlers, one variant per type
//! - [`Outcome`] - the pending/produced result of a native event
//!
//! # Handlers
//!
//! - [`Handler`] - trait-object handlers (closures included)
//! - [`Callback`] / [`ForeignCallback`] - function pointer handlers with an
//!   opaque argument
//!
//! # Error Types
//!
//! - [`MemHookError`] - registration errors
//! - [`Status`] - C-compatible status codes
//! - [`ConfigError`] - configuration errors

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod error;
mod event;
mod handler;
mod outcome;
mod record;

pub use error::{ConfigError, MemHookError, Status};
pub use event::{EventKind, EventType};
pub use handler::{Callback, ForeignCallback, Handler};
pub use outcome::Outcome;
pub use record::{
    Event, FAILED, MmapEvent, MremapEvent, MunmapEvent, SbrkEvent, ShmatEvent, ShmdtEvent,
    VmRange,
};
