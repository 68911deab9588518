//! Logging handler for event observation.
//!
//! Formatting and the subscriber may allocate, so this handler breaks the
//! no-allocation contract. Use it for debugging only.

use memhook_core::{Event, EventType, Handler};

/// A handler that logs every event it receives.
#[derive(Debug, Clone, Copy)]
pub struct LoggingHandler {
    name: &'static str,
}

impl LoggingHandler {
    /// Create a logging handler.
    pub const fn new() -> Self {
        Self::named("memhook")
    }

    /// Create a logging handler whose records carry `name`.
    pub const fn named(name: &'static str) -> Self {
        Self { name }
    }

    /// The name attached to log records.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for LoggingHandler {
    fn on_event(&self, event_type: EventType, event: &mut Event) {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!(
                handler = self.name,
                event_type = ?event_type,
                done = event.is_done(),
                ?event,
                "memory event"
            );
        }
        #[cfg(not(feature = "tracing"))]
        {
            let _ = (event_type, event);
        }
    }
}
