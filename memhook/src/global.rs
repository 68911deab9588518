//! The process-wide dispatcher.
//!
//! Intercepted calls arrive without any context, so the hook installer and
//! the C ABI route them to one lazily created [`Dispatcher`]. The dispatch
//! path only ever looks it up with [`try_global`]; creating it allocates and
//! is left to the control plane.

use libc::c_void;
use memhook_core::{Callback, EventType, Handler, MemHookError};
use memhook_std::{Config, Dispatcher};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

/// Errors returned by [`init`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The global dispatcher already exists.
    #[error("the global memhook dispatcher is already initialized")]
    AlreadyInitialized,
}

/// Create the global dispatcher with `config`.
///
/// Fails if it was already created, explicitly or by [`global`].
pub fn init(config: Config) -> Result<&'static Dispatcher, InitError> {
    let mut created = false;
    let dispatcher = GLOBAL.get_or_init(|| {
        created = true;
        Dispatcher::with_config(memhook_std::SyscallGateway, config)
    });
    if created {
        Ok(dispatcher)
    } else {
        Err(InitError::AlreadyInitialized)
    }
}

/// The global dispatcher, created from the environment on first use.
///
/// A malformed environment is logged and replaced by the defaults.
pub fn global() -> &'static Dispatcher {
    GLOBAL.get_or_init(|| {
        let config = Config::from_env().unwrap_or_else(|_err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "invalid memhook environment, using defaults");
            Config::default()
        });
        Dispatcher::with_config(memhook_std::SyscallGateway, config)
    })
}

/// The global dispatcher if it was created.
#[inline]
pub fn try_global() -> Option<&'static Dispatcher> {
    GLOBAL.get()
}

/// Remove every handler from the global dispatcher and wait until no
/// dispatch can still run one of them.
///
/// Must not be called from inside a handler.
pub fn teardown() {
    if let Some(dispatcher) = GLOBAL.get() {
        dispatcher.clear();
        dispatcher.synchronize();

        #[cfg(feature = "tracing")]
        tracing::debug!("memhook torn down");
    }
}

/// Install `callback` with `arg` in the global dispatcher.
///
/// See [`Dispatcher::set_event_handler`].
pub fn set_event_handler(
    events: EventType,
    priority: i32,
    callback: Callback,
    arg: *mut c_void,
) -> Result<(), MemHookError> {
    global().set_event_handler(events, priority, callback, arg)
}

/// Remove `events` from the registration of `(callback, arg)`.
pub fn unset_event_handler(events: EventType, callback: Callback, arg: *mut c_void) {
    if let Some(dispatcher) = try_global() {
        dispatcher.unset_event_handler(events, callback, arg);
    }
}

/// Install a shared handler object in the global dispatcher.
pub fn register_handler(
    events: EventType,
    priority: i32,
    handler: Arc<dyn Handler>,
) -> Result<(), MemHookError> {
    global().register_handler(events, priority, handler)
}

/// Remove `events` from a shared handler object's registration.
pub fn unregister_handler(events: EventType, handler: &Arc<dyn Handler>) {
    if let Some(dispatcher) = try_global() {
        dispatcher.unregister_handler(events, handler);
    }
}

/// Install a handler with static storage in the global dispatcher.
pub fn register_static(
    events: EventType,
    priority: i32,
    handler: &'static dyn Handler,
) -> Result<(), MemHookError> {
    global().register_static(events, priority, handler)
}

/// Remove `events` from a static handler's registration.
pub fn unregister_static(events: EventType, handler: &'static dyn Handler) {
    if let Some(dispatcher) = try_global() {
        dispatcher.unregister_static(events, handler);
    }
}

/// Install every handler declared with `#[subscribe]` in the global
/// dispatcher. Returns how many were installed.
#[cfg(feature = "inventory")]
pub fn install_collected() -> Result<usize, MemHookError> {
    memhook_std::collected::install(global())
}
