#![allow(dead_code)]

use libc::c_void;
use memhook::{Dispatcher, Event, EventKind, EventType, Handler, VmRange, testing::MockGateway};
use std::sync::{Arc, Mutex};

// ============================================================================
// Helpers
// ============================================================================

pub fn addr(value: usize) -> *mut c_void {
    value as *mut c_void
}

pub fn mock_dispatcher() -> Dispatcher<MockGateway> {
    Dispatcher::with_gateway(MockGateway::new())
}

pub fn shm_dispatcher(segment_size: usize) -> Dispatcher<MockGateway> {
    Dispatcher::with_gateway(MockGateway::new().with_shm_size(segment_size))
}

/// Anonymous private mapping through `dispatcher`.
pub fn map_anon<G: memhook::Gateway>(dispatcher: &Dispatcher<G>, size: usize) -> *mut c_void {
    unsafe {
        dispatcher.mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    }
}

// ============================================================================
// Test Handlers
// ============================================================================

/// Records the aggregate ranges it observes.
#[derive(Clone, Default)]
pub struct RangeRecorder {
    pub ranges: Arc<Mutex<Vec<(EventKind, VmRange)>>>,
}

impl RangeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(EventKind, usize, usize)> {
        self.ranges
            .lock()
            .unwrap()
            .drain(..)
            .map(|(kind, range)| (kind, range.start(), range.size))
            .collect()
    }
}

impl Handler for RangeRecorder {
    fn on_event(&self, _event_type: EventType, event: &mut Event) {
        if let Some(range) = event.range() {
            self.ranges.lock().unwrap().push((event.kind(), range));
        }
    }
}

/// Records the priority of every invocation into a shared order list.
pub struct OrderRecordingHandler {
    pub priority: i32,
    pub order: Arc<Mutex<Vec<i32>>>,
}

impl Handler for OrderRecordingHandler {
    fn on_event(&self, _event_type: EventType, _event: &mut Event) {
        self.order.lock().unwrap().push(self.priority);
    }
}
