//! Filter handler restricting aggregate events to an address window.

use memhook_core::{Event, EventType, Handler, VmRange};

/// Forwards aggregate events to `inner` only when their range overlaps
/// `[start, end)`. Native events always pass.
#[derive(Debug, Clone)]
pub struct RangeFilter<H> {
    start: usize,
    end: usize,
    inner: H,
}

impl<H> RangeFilter<H> {
    /// Wrap `inner`, watching `[start, end)`.
    pub fn new(start: usize, end: usize, inner: H) -> Self {
        Self { start, end, inner }
    }

    /// The wrapped handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Whether `range` overlaps the watched window.
    pub fn overlaps(&self, range: &VmRange) -> bool {
        range.size != 0 && range.start() < self.end && range.end() > self.start
    }
}

impl<H: Handler> Handler for RangeFilter<H> {
    fn on_event(&self, event_type: EventType, event: &mut Event) {
        match event.range() {
            Some(range) if !self.overlaps(&range) => {}
            _ => self.inner.on_event(event_type, event),
        }
    }
}
