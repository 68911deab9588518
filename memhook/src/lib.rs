//! # memhook - Memory Event Interception and Dispatch
//!
//! `memhook` notifies interested code whenever the process address space
//! changes through `mmap`, `munmap`, `mremap`, `shmat`, `shmdt` or `sbrk`.
//!
//! Handlers register for a set of [`EventType`] bits with a priority.
//! Negative priorities run before the genuine operation and may rewrite its
//! parameters or perform it themselves; non-negative priorities run after
//! it and see the result. Successful operations are additionally reported
//! as [`EventType::VM_MAPPED`] / [`EventType::VM_UNMAPPED`] ranges.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memhook::prelude::*;
//! use std::sync::Arc;
//!
//! let watcher = Arc::new(|event_type: EventType, event: &mut Event| {
//!     if let Some(range) = event.range() {
//!         let _ = (event_type, range.start(), range.size);
//!     }
//! });
//! memhook::register_handler(EventType::AGGREGATE, 0, watcher).unwrap();
//!
//! // The hook installer routes intercepted calls here.
//! let addr = unsafe {
//!     memhook::dispatch::mmap(
//!         std::ptr::null_mut(),
//!         4096,
//!         libc::PROT_READ,
//!         libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
//!         -1,
//!         0,
//!     )
//! };
//! ```
//!
//! Handlers run in the context of the intercepted call: they must not
//! allocate, block or call an intercepted primitive. Use [`orig`] to perform
//! memory operations from a handler.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use memhook_core::{
    // Handlers
    Callback,
    // Errors
    ConfigError,
    // Events
    Event,
    EventKind,
    EventType,
    FAILED,
    ForeignCallback,
    Handler,
    MemHookError,
    MmapEvent,
    MremapEvent,
    MunmapEvent,
    Outcome,
    SbrkEvent,
    ShmatEvent,
    ShmdtEvent,
    Status,
    VmRange,
};

// Engine
pub use memhook_std::{Config, ConfigBuilder, Dispatcher, Gateway, Registry, SyscallGateway};

mod global;

pub mod dispatch;
pub mod ffi;

pub use global::{
    InitError, global, init, register_handler, register_static, set_event_handler, teardown,
    try_global, unregister_handler, unregister_static, unset_event_handler,
};

#[cfg(feature = "inventory")]
pub use global::install_collected;

/// Genuine memory primitives, bypassing every handler.
pub mod orig {
    pub use memhook_std::gateway::raw::{
        mmap, mremap, munmap, page_size, sbrk, shm_segment_size, shmat, shmdt,
    };
}

/// Standard handler implementations.
pub mod handlers {
    #![allow(clippy::wildcard_imports)]
    pub use memhook_std::handlers::*;
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use memhook_std::testing::*;
}

/// Handlers collected through `#[subscribe]`.
#[cfg(feature = "inventory")]
pub mod collected {
    pub use memhook_std::collected::{CollectedHandler, collected, install};
}

/// Prelude module - common imports for memhook.
///
/// # Usage
///
/// ```rust,ignore
/// use memhook::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Engine
        Config,
        Dispatcher,
        // Events
        Event,
        EventKind,
        EventType,
        Gateway,
        // Handlers
        Handler,
        // Errors
        MemHookError,
        Outcome,
        VmRange,
    };
}

#[cfg(feature = "macros")]
pub use memhook_macros::{handler, subscribe};

#[cfg(feature = "inventory")]
pub use inventory;
#[cfg(feature = "inventory")]
pub use memhook_std::CollectedHandler;
