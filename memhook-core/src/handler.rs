//! Handlers: the callbacks stored in event chains.
//!
//! A handler receives the event type being fired and the event record. For
//! native events it may rewrite parameters and, while the result is still
//! pending, perform the operation itself and complete the result. For
//! aggregate events it only observes.
//!
//! # Contract
//!
//! Handlers run on whatever thread performed the intercepted call, possibly
//! inside a signal handler and possibly while the allocator holds its own
//! locks. They must not allocate memory, block, or call an intercepted
//! primitive: to perform a memory operation use the original-call gateway.
//! A handler that finds a result already produced must not repeat the
//! operation's side effects.

use crate::{event::EventType, record::Event};
use libc::c_void;

/// A trait-object handler.
///
/// Closures `Fn(EventType, &mut Event)` implement this trait.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a memory event handler",
    label = "missing `Handler` implementation",
    note = "Handlers must implement `on_event(&self, EventType, &mut Event)`."
)]
pub trait Handler: Send + Sync + 'static {
    /// Called when an event the handler subscribed to is fired.
    fn on_event(&self, event_type: EventType, event: &mut Event);
}

impl<F> Handler for F
where
    F: Fn(EventType, &mut Event) + Send + Sync + 'static,
{
    fn on_event(&self, event_type: EventType, event: &mut Event) {
        (self)(event_type, event)
    }
}

/// A plain function callback with an opaque user argument.
///
/// Registrations made with a callback are identified by the
/// `(callback, arg)` pair.
pub type Callback = fn(EventType, &mut Event, *mut c_void);

/// A callback registered through the C ABI.
///
/// The first argument carries the raw [`EventType`] bits.
pub type ForeignCallback = unsafe extern "C" fn(u32, *mut Event, *mut c_void);
