//! Testing utilities for memhook.
//!
//! This module provides doubles for exercising handlers and the dispatcher
//! without touching the real address space.
//!
//! # Features
//!
//! - [`MockGateway`]: A fake gateway that hands out addresses and counts calls
//! - [`RecordingHandler`]: A handler that records every event into an [`EventLog`]
//! - [`CountingHandler`]: An allocation-free handler that counts invocations
//! - [`EmulatingHandler`]: A handler that performs the operation itself

use crate::{gateway::Gateway, synth::MREMAP_MAYMOVE};
use libc::{c_int, c_void, off_t};
use memhook_core::{Event, EventKind, EventType, FAILED, Handler};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

// ============================================================================
// Mock Gateway
// ============================================================================

const NATIVE_KINDS: usize = 6;

/// A gateway that simulates the memory primitives.
///
/// Mappings are handed out from a bump pointer starting at
/// [`MockGateway::MAP_BASE`]; the program break starts at
/// [`MockGateway::BRK_BASE`]. No memory is ever touched, nothing allocates,
/// and every call is counted per event kind.
///
/// # Example
///
/// ```rust
/// use memhook_std::gateway::Gateway;
/// use memhook_std::memhook_core::{EventKind, EventType, FAILED};
/// use memhook_std::testing::MockGateway;
///
/// let gateway = MockGateway::new();
/// gateway.fail(EventType::MMAP);
/// let addr = unsafe { gateway.mmap(std::ptr::null_mut(), 4096, 0, 0, -1, 0) };
/// assert_eq!(addr, FAILED);
/// assert_eq!(gateway.calls(EventKind::Mmap), 1);
/// ```
#[derive(Debug)]
pub struct MockGateway {
    calls: [AtomicUsize; NATIVE_KINDS],
    next_map: AtomicUsize,
    brk: AtomicUsize,
    failing: AtomicU32,
    shm_size: AtomicUsize,
}

impl MockGateway {
    /// First address handed out by `mmap`, `mremap` and `shmat`.
    pub const MAP_BASE: usize = 0x7000_0000_0000;
    /// Initial program break.
    pub const BRK_BASE: usize = 0x5000_0000;
    /// Page size reported by the mock.
    pub const PAGE_SIZE: usize = 4096;

    /// Create a mock where every operation succeeds.
    pub fn new() -> Self {
        Self {
            calls: [const { AtomicUsize::new(0) }; NATIVE_KINDS],
            next_map: AtomicUsize::new(Self::MAP_BASE),
            brk: AtomicUsize::new(Self::BRK_BASE),
            failing: AtomicU32::new(0),
            shm_size: AtomicUsize::new(0),
        }
    }

    /// Report every shared memory segment as `size` bytes long.
    pub fn with_shm_size(self, size: usize) -> Self {
        self.shm_size.store(size, Ordering::SeqCst);
        self
    }

    /// Make subsequent calls of the native `events` fail.
    pub fn fail(&self, events: EventType) {
        self.failing.store(events.bits(), Ordering::SeqCst);
    }

    /// Number of genuine calls of `kind` performed so far.
    pub fn calls(&self, kind: EventKind) -> usize {
        if kind.is_aggregate() {
            return 0;
        }
        self.calls[kind.index()].load(Ordering::SeqCst)
    }

    /// Total number of genuine calls.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// The address the next fresh mapping will get.
    pub fn peek_next_address(&self) -> *mut c_void {
        self.next_map.load(Ordering::SeqCst) as *mut c_void
    }

    /// Current simulated program break.
    pub fn current_break(&self) -> *mut c_void {
        self.brk.load(Ordering::SeqCst) as *mut c_void
    }

    fn enter(&self, kind: EventKind) -> bool {
        self.calls[kind.index()].fetch_add(1, Ordering::SeqCst);
        self.failing.load(Ordering::SeqCst) & kind.bit().bits() == 0
    }

    fn reserve(&self, size: usize) -> *mut c_void {
        let size = size.div_ceil(Self::PAGE_SIZE).max(1) * Self::PAGE_SIZE;
        self.next_map.fetch_add(size, Ordering::SeqCst) as *mut c_void
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway for MockGateway {
    unsafe fn mmap(
        &self,
        address: *mut c_void,
        size: usize,
        _prot: c_int,
        _flags: c_int,
        _fd: c_int,
        _offset: off_t,
    ) -> *mut c_void {
        if !self.enter(EventKind::Mmap) {
            return FAILED;
        }
        if !address.is_null() {
            return address;
        }
        self.reserve(size)
    }

    unsafe fn munmap(&self, _address: *mut c_void, _size: usize) -> c_int {
        if self.enter(EventKind::Munmap) { 0 } else { -1 }
    }

    unsafe fn mremap(
        &self,
        address: *mut c_void,
        old_size: usize,
        new_size: usize,
        flags: c_int,
    ) -> *mut c_void {
        if !self.enter(EventKind::Mremap) {
            return FAILED;
        }
        if new_size > old_size && flags & MREMAP_MAYMOVE != 0 {
            return self.reserve(new_size);
        }
        address
    }

    unsafe fn shmat(&self, _shmid: c_int, shmaddr: *const c_void, _shmflg: c_int) -> *mut c_void {
        if !self.enter(EventKind::Shmat) {
            return FAILED;
        }
        if !shmaddr.is_null() {
            return shmaddr as *mut c_void;
        }
        self.reserve(self.shm_size.load(Ordering::SeqCst))
    }

    unsafe fn shmdt(&self, _shmaddr: *const c_void) -> c_int {
        if self.enter(EventKind::Shmdt) { 0 } else { -1 }
    }

    unsafe fn sbrk(&self, increment: isize) -> *mut c_void {
        if !self.enter(EventKind::Sbrk) {
            return FAILED;
        }
        self.brk.fetch_add(increment as usize, Ordering::SeqCst) as *mut c_void
    }

    fn shm_segment_size(&self, _shmid: c_int) -> Option<usize> {
        match self.shm_size.load(Ordering::SeqCst) {
            0 => None,
            size => Some(size),
        }
    }

    fn page_size(&self) -> usize {
        Self::PAGE_SIZE
    }

    fn program_break(&self) -> *mut c_void {
        self.current_break()
    }
}

// ============================================================================
// Recording Handler
// ============================================================================

/// One invocation seen by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// Label of the handler that saw the event.
    pub label: &'static str,
    /// Event type the handler was invoked for.
    pub event_type: EventType,
    /// The event as the handler received it.
    pub event: Event,
}

/// A shared, ordered log of handler invocations.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Arc<Mutex<Vec<Recorded>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a clone of the recorded invocations.
    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().unwrap().clone()
    }

    /// Labels of the recorded invocations, in order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.records.lock().unwrap().iter().map(|r| r.label).collect()
    }

    /// Recorded invocations for one event type.
    pub fn of_type(&self, event_type: EventType) -> Vec<Recorded> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Get the number of recorded invocations.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all recorded invocations.
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    fn push(&self, record: Recorded) {
        self.records.lock().unwrap().push(record);
    }
}

/// A handler that records every event it receives.
///
/// Recording allocates, so this handler is only suitable for tests.
///
/// # Example
///
/// ```rust
/// use memhook_std::memhook_core::{Event, EventType, Handler, VmRange};
/// use memhook_std::testing::{EventLog, RecordingHandler};
///
/// let log = EventLog::new();
/// let handler = RecordingHandler::new("first", &log);
/// let mut event = Event::VmMapped(VmRange::new(std::ptr::null_mut(), 4096));
/// handler.on_event(EventType::VM_MAPPED, &mut event);
/// assert_eq!(log.labels(), vec!["first"]);
/// ```
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    label: &'static str,
    log: EventLog,
}

impl RecordingHandler {
    /// Create a handler appending to `log` under `label`.
    pub fn new(label: &'static str, log: &EventLog) -> Self {
        Self {
            label,
            log: log.clone(),
        }
    }

    /// The log this handler writes to.
    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl Handler for RecordingHandler {
    fn on_event(&self, event_type: EventType, event: &mut Event) {
        self.log.push(Recorded {
            label: self.label,
            event_type,
            event: *event,
        });
    }
}

// ============================================================================
// Counting Handler
// ============================================================================

/// A handler that counts invocations. It never allocates.
#[derive(Debug, Default)]
pub struct CountingHandler {
    count: AtomicUsize,
}

impl CountingHandler {
    /// Create a handler with a zero count.
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Number of invocations so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Reset the count to zero.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

impl Handler for CountingHandler {
    fn on_event(&self, _event_type: EventType, _event: &mut Event) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Emulating Handler
// ============================================================================

/// A handler that performs native operations itself.
///
/// Pointer-returning events are completed with `address`, the others with
/// `code`. Events whose result already exists are left alone.
#[derive(Debug, Clone, Copy)]
pub struct EmulatingHandler {
    address: usize,
    code: c_int,
}

impl EmulatingHandler {
    /// Complete pointer results with `address` and integer results with 0.
    pub fn new(address: *mut c_void) -> Self {
        Self {
            address: address as usize,
            code: 0,
        }
    }

    /// Complete integer results with `code` instead of 0.
    pub fn with_code(mut self, code: c_int) -> Self {
        self.code = code;
        self
    }
}

impl Handler for EmulatingHandler {
    fn on_event(&self, _event_type: EventType, event: &mut Event) {
        let address = self.address as *mut c_void;
        match event {
            Event::Mmap(e) => {
                e.complete(address);
            }
            Event::Mremap(e) => {
                e.complete(address);
            }
            Event::Shmat(e) => {
                e.complete(address);
            }
            Event::Sbrk(e) => {
                e.complete(address);
            }
            Event::Munmap(e) => {
                e.complete(self.code);
            }
            Event::Shmdt(e) => {
                e.complete(self.code);
            }
            Event::VmMapped(_) | Event::VmUnmapped(_) => {}
        }
    }
}
