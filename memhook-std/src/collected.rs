//! Handlers collected at link time through `inventory`.
//!
//! `#[subscribe]` submits a [`CollectedHandler`] for the function it
//! annotates; [`install`] registers all of them with a dispatcher.

use crate::{dispatch::Dispatcher, gateway::Gateway};
use memhook_core::{EventType, Handler, MemHookError};

/// A handler submitted to the distributed collection.
pub struct CollectedHandler {
    /// Events the handler subscribes to.
    pub events: EventType,
    /// Chain priority.
    pub priority: i32,
    /// The handler instance.
    pub handler: &'static dyn Handler,
    /// Name for debugging.
    pub name: &'static str,
}

impl CollectedHandler {
    /// Create a new collected handler entry.
    pub const fn new(
        events: EventType,
        priority: i32,
        handler: &'static dyn Handler,
        name: &'static str,
    ) -> Self {
        Self {
            events,
            priority,
            handler,
            name,
        }
    }
}

impl std::fmt::Debug for CollectedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectedHandler")
            .field("events", &self.events)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .finish()
    }
}

inventory::collect!(CollectedHandler);

/// All submitted handlers, ordered by priority then name.
pub fn collected() -> Vec<&'static CollectedHandler> {
    let mut entries: Vec<&'static CollectedHandler> =
        inventory::iter::<CollectedHandler>.into_iter().collect();
    entries.sort_by(|a, b| (a.priority, a.name).cmp(&(b.priority, b.name)));
    entries
}

/// Register every submitted handler with `dispatcher`.
///
/// Stops at the first failure; handlers installed before it stay
/// registered. Returns the number of handlers installed.
pub fn install<G: Gateway>(dispatcher: &Dispatcher<G>) -> Result<usize, MemHookError> {
    let entries = collected();
    for entry in &entries {
        dispatcher.register_static(entry.events, entry.priority, entry.handler)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            name = entry.name,
            events = ?entry.events,
            priority = entry.priority,
            "installed collected handler"
        );
    }
    Ok(entries.len())
}
