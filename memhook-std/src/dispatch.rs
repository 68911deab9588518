//! The dispatch engine.
//!
//! A [`Dispatcher`] owns a [`Registry`], a [`Gateway`] and the aggregate
//! [`Synthesizer`]. Its entry points have the exact shape of the primitives
//! they stand in for.
//!
//! For every native event the chain is visited once in ascending priority.
//! Immediately before the first handler with priority `>= 0` (or after the
//! last handler if there is none) the genuine operation runs, unless a
//! handler already produced a result. `VM_UNMAPPED` handlers run right
//! before that genuine operation, while the range is still mapped. Once the
//! chain has finished and the result reports success, `VM_MAPPED` handlers
//! run. All of them see the same chain snapshot.
//!
//! A native event re-entering on the same thread skips its native chain but
//! still produces its aggregate events. An aggregate chain re-entering on
//! the same thread is skipped.
//!
//! Dispatch takes no locks and performs no allocation of its own.

use crate::{
    config::Config,
    gateway::{self, Gateway, SyscallGateway},
    registry::{HandlerRef, Registry, Snapshot},
    synth::Synthesizer,
};
use libc::{c_int, c_void, off_t};
use memhook_core::{
    Callback, Event, EventKind, EventType, FAILED, ForeignCallback, Handler, MemHookError,
    MmapEvent, MremapEvent, MunmapEvent, SbrkEvent, ShmatEvent, ShmdtEvent, VmRange,
};
use std::{cell::Cell, sync::Arc};

// ============================================================================
// Recursion guard
// ============================================================================

thread_local! {
    static ACTIVE: Cell<u32> = const { Cell::new(0) };
}

/// Marks an event kind as being dispatched on the current thread.
struct Reentry {
    bit: u32,
}

impl Reentry {
    /// A marker that guards nothing.
    const UNGUARDED: Reentry = Reentry { bit: 0 };

    /// Returns `None` if `kind` is already being dispatched on this thread.
    fn enter(kind: EventKind) -> Option<Reentry> {
        let bit = kind.bit().bits();
        ACTIVE
            .try_with(|active| {
                let current = active.get();
                if current & bit != 0 {
                    return None;
                }
                active.set(current | bit);
                Some(Reentry { bit })
            })
            // Thread-local storage is gone during thread teardown.
            .unwrap_or(Some(Reentry::UNGUARDED))
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        if self.bit != 0 {
            let _ = ACTIVE.try_with(|active| active.set(active.get() & !self.bit));
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// The memory event dispatcher.
///
/// # Example
///
/// ```rust
/// use memhook_std::dispatch::Dispatcher;
/// use memhook_std::memhook_core::{EventKind, EventType};
/// use memhook_std::testing::{CountingHandler, MockGateway};
/// use std::sync::Arc;
///
/// let dispatcher = Dispatcher::with_gateway(MockGateway::new());
/// let counter = Arc::new(CountingHandler::new());
/// dispatcher
///     .register_handler(EventType::MMAP | EventType::VM_MAPPED, 0, counter.clone())
///     .unwrap();
///
/// let addr = unsafe { dispatcher.mmap(std::ptr::null_mut(), 4096, 0, 0, -1, 0) };
/// assert_eq!(addr as usize, MockGateway::MAP_BASE);
/// assert_eq!(counter.count(), 2);
/// assert_eq!(dispatcher.gateway().calls(EventKind::Mmap), 1);
/// ```
#[derive(Debug)]
pub struct Dispatcher<G: Gateway = SyscallGateway> {
    registry: Registry,
    gateway: G,
    config: Config,
    synth: Synthesizer,
}

impl Dispatcher<SyscallGateway> {
    /// Create a dispatcher over the real system calls with the default
    /// configuration.
    pub fn new() -> Self {
        Self::with_config(SyscallGateway, Config::default())
    }
}

impl Default for Dispatcher<SyscallGateway> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Gateway> Dispatcher<G> {
    /// Create a dispatcher over `gateway` with the default configuration.
    pub fn with_gateway(gateway: G) -> Self {
        Self::with_config(gateway, Config::default())
    }

    /// Create a dispatcher over `gateway` with `config`.
    pub fn with_config(gateway: G, config: Config) -> Self {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            enable_events = config.enable_events(),
            events = ?config.events(),
            recursion_guard = config.recursion_guard(),
            "created memory event dispatcher"
        );

        Self {
            registry: Registry::new(),
            gateway,
            config,
            synth: Synthesizer::new(),
        }
    }

    /// The handler registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The gateway performing genuine operations.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The configuration this dispatcher was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The aggregate event synthesizer.
    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synth
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    fn register(
        &self,
        events: EventType,
        priority: i32,
        handler: HandlerRef,
    ) -> Result<(), MemHookError> {
        Registry::validate(events)?;
        if let Err(err) = self.config.check(events) {
            #[cfg(feature = "tracing")]
            tracing::warn!(events = ?events, %err, "rejected event handler");
            return Err(err);
        }
        self.registry.register(events, priority, handler)
    }

    /// Install `callback` with `arg` for every event in `events`.
    ///
    /// Negative priorities run before the genuine operation, non-negative
    /// ones after it.
    pub fn set_event_handler(
        &self,
        events: EventType,
        priority: i32,
        callback: Callback,
        arg: *mut c_void,
    ) -> Result<(), MemHookError> {
        self.register(events, priority, HandlerRef::Fn { callback, arg })
    }

    /// Remove `events` from the registration of `(callback, arg)`.
    pub fn unset_event_handler(&self, events: EventType, callback: Callback, arg: *mut c_void) {
        self.registry
            .unregister(events, &HandlerRef::Fn { callback, arg });
    }

    /// Install a C callback with `arg` for every event in `events`.
    pub fn set_foreign_event_handler(
        &self,
        events: EventType,
        priority: i32,
        callback: ForeignCallback,
        arg: *mut c_void,
    ) -> Result<(), MemHookError> {
        self.register(events, priority, HandlerRef::Foreign { callback, arg })
    }

    /// Remove `events` from the registration of a C callback.
    pub fn unset_foreign_event_handler(
        &self,
        events: EventType,
        callback: ForeignCallback,
        arg: *mut c_void,
    ) {
        self.registry
            .unregister(events, &HandlerRef::Foreign { callback, arg });
    }

    /// Install a shared handler object.
    pub fn register_handler(
        &self,
        events: EventType,
        priority: i32,
        handler: Arc<dyn Handler>,
    ) -> Result<(), MemHookError> {
        self.register(events, priority, HandlerRef::Object(handler))
    }

    /// Remove `events` from a shared handler object's registration.
    pub fn unregister_handler(&self, events: EventType, handler: &Arc<dyn Handler>) {
        self.registry
            .unregister(events, &HandlerRef::Object(handler.clone()));
    }

    /// Install a handler with static storage.
    pub fn register_static(
        &self,
        events: EventType,
        priority: i32,
        handler: &'static dyn Handler,
    ) -> Result<(), MemHookError> {
        self.register(events, priority, HandlerRef::Static(handler))
    }

    /// Remove `events` from a static handler's registration.
    pub fn unregister_static(&self, events: EventType, handler: &'static dyn Handler) {
        self.registry.unregister(events, &HandlerRef::Static(handler));
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.registry.clear();
    }

    /// Wait until no dispatch can observe a removed handler.
    ///
    /// Must not be called from inside a handler.
    pub fn synchronize(&self) {
        self.registry.synchronize();
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Dispatch a native event record.
    ///
    /// When this returns the record's result has been produced, either by a
    /// handler or by the gateway. Aggregate records are ignored.
    ///
    /// # Safety
    ///
    /// The parameters must satisfy the contract of the primitive, since the
    /// genuine operation is performed with them.
    pub unsafe fn fire(&self, event: &mut Event) {
        let kind = event.kind();
        if kind.is_aggregate() {
            return;
        }
        if !self.config.is_enabled(kind) {
            // SAFETY: forwarded to the caller.
            unsafe { gateway::perform(&self.gateway, event) };
            return;
        }

        let snapshot = self.registry.read();
        let reentry = self.enter(kind);
        // SAFETY: forwarded to the caller.
        let released = match reentry {
            Some(_) => unsafe { self.run_chain(&snapshot, kind, event) },
            // Re-entered on this thread: only the genuine operation and its
            // aggregate events.
            None => unsafe { self.cross(&snapshot, event) },
        };
        if event.succeeded() {
            for (kind, range) in self.synth.derive(event, released, &self.gateway) {
                self.deliver(&snapshot, kind, range);
            }
        }
    }

    fn enter(&self, kind: EventKind) -> Option<Reentry> {
        if self.config.recursion_guard() {
            Reentry::enter(kind)
        } else {
            Some(Reentry::UNGUARDED)
        }
    }

    /// Visit the native chain. Returns the range announced as released.
    unsafe fn run_chain(
        &self,
        snapshot: &Snapshot,
        kind: EventKind,
        event: &mut Event,
    ) -> Option<VmRange> {
        let event_type = kind.bit();
        let mut released = None;
        let mut crossed = false;
        for entry in snapshot.chain(kind) {
            if !crossed && entry.priority() >= 0 {
                crossed = true;
                // SAFETY: forwarded to the caller of `fire`.
                released = unsafe { self.cross(snapshot, event) };
            }
            let before = *event;
            entry.invoke(event_type, event);
            // Handlers may rewrite fields, not the kind of event.
            if event.kind() != kind {
                *event = before;
            }
        }
        if !crossed {
            // SAFETY: as above.
            released = unsafe { self.cross(snapshot, event) };
        }
        released
    }

    /// The crossing point: announce the range about to be released, then
    /// perform the genuine operation. Nothing happens once a handler has
    /// produced the result.
    unsafe fn cross(&self, snapshot: &Snapshot, event: &mut Event) -> Option<VmRange> {
        if event.is_done() {
            return None;
        }
        let mut released = None;
        if !snapshot.chain(EventKind::VmUnmapped).is_empty() {
            released = self.synth.releasing(event, &self.gateway);
            if let Some(range) = released {
                self.deliver(snapshot, EventKind::VmUnmapped, range);
            }
        }
        // SAFETY: forwarded to the caller of `fire`.
        unsafe { gateway::perform(&self.gateway, event) };
        released
    }

    fn deliver(&self, snapshot: &Snapshot, kind: EventKind, range: VmRange) {
        let chain = snapshot.chain(kind);
        if chain.is_empty() {
            return;
        }
        let Some(_reentry) = self.enter(kind) else {
            return;
        };
        let event_type = kind.bit();
        for entry in chain {
            let mut aggregate = match kind {
                EventKind::VmUnmapped => Event::VmUnmapped(range),
                _ => Event::VmMapped(range),
            };
            entry.invoke(event_type, &mut aggregate);
        }
    }

    /// Dispatching `mmap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `mmap(2)`.
    pub unsafe fn mmap(
        &self,
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        let mut event = Event::Mmap(MmapEvent::new(address, size, prot, flags, fd, offset));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Mmap(e) => e.result().get().unwrap_or(FAILED),
            _ => FAILED,
        }
    }

    /// Dispatching `munmap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `munmap(2)`.
    pub unsafe fn munmap(&self, address: *mut c_void, size: usize) -> c_int {
        let mut event = Event::Munmap(MunmapEvent::new(address, size));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Munmap(e) => e.result().get().unwrap_or(-1),
            _ => -1,
        }
    }

    /// Dispatching `mremap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `mremap(2)`.
    pub unsafe fn mremap(
        &self,
        address: *mut c_void,
        old_size: usize,
        new_size: usize,
        flags: c_int,
    ) -> *mut c_void {
        let mut event = Event::Mremap(MremapEvent::new(address, old_size, new_size, flags));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Mremap(e) => e.result().get().unwrap_or(FAILED),
            _ => FAILED,
        }
    }

    /// Dispatching `shmat()`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmat(2)`.
    pub unsafe fn shmat(&self, shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void {
        let mut event = Event::Shmat(ShmatEvent::new(shmid, shmaddr, shmflg));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Shmat(e) => e.result().get().unwrap_or(FAILED),
            _ => FAILED,
        }
    }

    /// Dispatching `shmdt()`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmdt(2)`.
    pub unsafe fn shmdt(&self, shmaddr: *const c_void) -> c_int {
        let mut event = Event::Shmdt(ShmdtEvent::new(shmaddr));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Shmdt(e) => e.result().get().unwrap_or(-1),
            _ => -1,
        }
    }

    /// Dispatching `sbrk()`.
    ///
    /// # Safety
    ///
    /// Same contract as `sbrk(2)`.
    pub unsafe fn sbrk(&self, increment: isize) -> *mut c_void {
        let mut event = Event::Sbrk(SbrkEvent::new(increment));
        unsafe { self.fire(&mut event) };
        match event {
            Event::Sbrk(e) => e.result().get().unwrap_or(FAILED),
            _ => FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CountingHandler, EmulatingHandler, EventLog, MockGateway, RecordingHandler,
    };
    use memhook_core::{Outcome, VmRange};
    use std::{ptr, sync::Mutex};

    fn mock() -> Dispatcher<MockGateway> {
        Dispatcher::with_gateway(MockGateway::new())
    }

    fn record(
        dispatcher: &Dispatcher<MockGateway>,
        log: &EventLog,
        label: &'static str,
        events: EventType,
        priority: i32,
    ) {
        dispatcher
            .register_handler(events, priority, Arc::new(RecordingHandler::new(label, log)))
            .unwrap();
    }

    #[test]
    fn test_empty_chain_calls_gateway_once() {
        let dispatcher = mock();
        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(addr as usize, MockGateway::MAP_BASE);
        assert_eq!(dispatcher.gateway().calls(EventKind::Mmap), 1);
    }

    #[test]
    fn test_crossing_point() {
        let dispatcher = mock();
        let log = EventLog::new();
        record(&dispatcher, &log, "pre", EventType::MUNMAP, -5);
        record(&dispatcher, &log, "zero", EventType::MUNMAP, 0);
        record(&dispatcher, &log, "post", EventType::MUNMAP, 5);

        let rc = unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        assert_eq!(rc, 0);

        let results: Vec<_> = log
            .records()
            .into_iter()
            .map(|r| match r.event {
                Event::Munmap(e) => (r.label, e.result()),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            results,
            vec![
                ("pre", Outcome::Pending),
                ("zero", Outcome::Done(0)),
                ("post", Outcome::Done(0)),
            ]
        );
        assert_eq!(dispatcher.gateway().calls(EventKind::Munmap), 1);
    }

    #[test]
    fn test_only_negative_handlers_call_gateway_at_end() {
        let dispatcher = mock();
        let log = EventLog::new();
        record(&dispatcher, &log, "a", EventType::SBRK, -2);
        record(&dispatcher, &log, "b", EventType::SBRK, -1);

        let prev = unsafe { dispatcher.sbrk(64) };
        assert_eq!(prev as usize, MockGateway::BRK_BASE);
        assert!(log.records().iter().all(|r| !r.event.is_done()));
        assert_eq!(dispatcher.gateway().calls(EventKind::Sbrk), 1);
    }

    #[test]
    fn test_emulation_skips_gateway() {
        let dispatcher = mock();
        let emulated = 0x1234_5000 as *mut c_void;
        dispatcher
            .register_handler(EventType::MMAP, -10, Arc::new(EmulatingHandler::new(emulated)))
            .unwrap();
        // A later emulator cannot override the first result.
        dispatcher
            .register_handler(
                EventType::MMAP,
                10,
                Arc::new(EmulatingHandler::new(0x9999_0000 as *mut c_void)),
            )
            .unwrap();

        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(addr, emulated);
        assert_eq!(dispatcher.gateway().total_calls(), 0);
    }

    #[test]
    fn test_parameter_rewrite_reaches_gateway() {
        let dispatcher = mock();
        let hint = 0x4000_0000 as *mut c_void;
        let hint_addr = hint as usize;
        dispatcher
            .register_handler(
                EventType::MMAP,
                -1,
                Arc::new(move |_: EventType, event: &mut Event| {
                    if let Event::Mmap(e) = event {
                        e.address = hint_addr as *mut c_void;
                    }
                }),
            )
            .unwrap();
        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(addr, hint);
    }

    #[test]
    fn test_handler_cannot_change_event_kind() {
        let dispatcher = mock();
        dispatcher
            .register_handler(
                EventType::MUNMAP,
                -1,
                Arc::new(|_: EventType, event: &mut Event| {
                    *event = Event::Sbrk(SbrkEvent::new(1));
                }),
            )
            .unwrap();
        let rc = unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        assert_eq!(rc, 0);
        assert_eq!(dispatcher.gateway().calls(EventKind::Munmap), 1);
        assert_eq!(dispatcher.gateway().calls(EventKind::Sbrk), 0);
    }

    #[test]
    fn test_aggregates_after_chain() {
        let dispatcher = mock();
        let log = EventLog::new();
        record(&dispatcher, &log, "mapped", EventType::VM_MAPPED, -100);
        record(&dispatcher, &log, "native", EventType::MMAP, 100);

        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 8192, 0, 0, -1, 0) };
        assert_eq!(log.labels(), vec!["native", "mapped"]);
        assert_eq!(
            log.records()[1].event,
            Event::VmMapped(VmRange::new(addr, 8192))
        );
    }

    #[test]
    fn test_failed_operation_suppresses_mapped() {
        let dispatcher = mock();
        let counter = Arc::new(CountingHandler::new());
        dispatcher
            .register_handler(EventType::VM_MAPPED, 0, counter.clone())
            .unwrap();
        dispatcher.gateway().fail(EventType::MMAP | EventType::SBRK);

        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        assert_eq!(addr, FAILED);
        assert_eq!(unsafe { dispatcher.sbrk(4096) }, FAILED);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_unmapped_delivered_before_release() {
        let dispatcher = Arc::new(mock());
        let log = EventLog::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::downgrade(&dispatcher);
        let sink = observed.clone();
        record(&dispatcher, &log, "pre", EventType::MUNMAP, -1);
        record(&dispatcher, &log, "post", EventType::MUNMAP, 1);
        record(&dispatcher, &log, "unmapped", EventType::VM_UNMAPPED, 0);
        dispatcher
            .register_handler(
                EventType::VM_UNMAPPED,
                0,
                Arc::new(move |_: EventType, _: &mut Event| {
                    if let Some(dispatcher) = inner.upgrade() {
                        let calls = dispatcher.gateway().calls(EventKind::Munmap);
                        sink.lock().unwrap().push(calls);
                    }
                }),
            )
            .unwrap();

        let rc = unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        assert_eq!(rc, 0);
        assert_eq!(*observed.lock().unwrap(), vec![0]);
        assert_eq!(dispatcher.gateway().calls(EventKind::Munmap), 1);
        assert_eq!(log.labels(), vec!["pre", "unmapped", "post"]);
        dispatcher.clear();
    }

    #[test]
    fn test_emulated_release_reported_afterwards() {
        let dispatcher = mock();
        let log = EventLog::new();
        dispatcher
            .register_handler(
                EventType::MUNMAP,
                -1,
                Arc::new(|_: EventType, event: &mut Event| {
                    if let Event::Munmap(e) = event {
                        e.complete(0);
                    }
                }),
            )
            .unwrap();
        record(&dispatcher, &log, "native", EventType::MUNMAP, 1);
        record(&dispatcher, &log, "unmapped", EventType::VM_UNMAPPED, 0);

        let rc = unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        assert_eq!(rc, 0);
        assert_eq!(dispatcher.gateway().total_calls(), 0);
        assert_eq!(log.labels(), vec!["native", "unmapped"]);
    }

    #[test]
    fn test_failed_shmdt_keeps_attachment() {
        let dispatcher = Dispatcher::with_gateway(MockGateway::new().with_shm_size(4096));
        let log = EventLog::new();
        record(&dispatcher, &log, "unmapped", EventType::VM_UNMAPPED, 0);

        let attached = unsafe { dispatcher.shmat(7, ptr::null(), 0) };
        dispatcher.gateway().fail(EventType::SHMDT);
        assert_eq!(unsafe { dispatcher.shmdt(attached) }, -1);
        assert_eq!(dispatcher.synthesizer().shm().len(), 1);

        dispatcher.gateway().fail(EventType::empty());
        assert_eq!(unsafe { dispatcher.shmdt(attached) }, 0);
        assert!(dispatcher.synthesizer().shm().is_empty());
        // Both attempts announced the range before releasing it.
        assert_eq!(log.of_type(EventType::VM_UNMAPPED).len(), 2);
    }

    #[test]
    fn test_aggregate_only_config_observes_natives() {
        let config = Config::builder().events(EventType::AGGREGATE).build();
        let dispatcher = Dispatcher::with_config(MockGateway::new(), config);
        let log = EventLog::new();
        record(&dispatcher, &log, "range", EventType::AGGREGATE, 0);

        let addr = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        unsafe { dispatcher.munmap(addr, 4096) };
        assert_eq!(
            log.records().into_iter().map(|r| r.event).collect::<Vec<_>>(),
            vec![
                Event::VmMapped(VmRange::new(addr, 4096)),
                Event::VmUnmapped(VmRange::new(addr, 4096)),
            ]
        );
    }

    #[test]
    fn test_aggregate_handlers_get_their_own_copy() {
        let dispatcher = mock();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher
            .register_handler(
                EventType::VM_UNMAPPED,
                -1,
                Arc::new(|_: EventType, event: &mut Event| {
                    if let Event::VmUnmapped(range) = event {
                        range.size = 1;
                    }
                }),
            )
            .unwrap();
        dispatcher
            .register_handler(
                EventType::VM_UNMAPPED,
                1,
                Arc::new(move |_: EventType, event: &mut Event| {
                    sink.lock().unwrap().push(event.range());
                }),
            )
            .unwrap();

        unsafe { dispatcher.munmap(0x20000 as *mut c_void, 0x3000) };
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(VmRange::new(0x20000 as *mut c_void, 0x3000))]
        );
    }

    #[test]
    fn test_fire_ignores_aggregates() {
        let dispatcher = mock();
        let counter = Arc::new(CountingHandler::new());
        dispatcher
            .register_handler(EventType::VM_MAPPED, 0, counter.clone())
            .unwrap();
        let mut event = Event::VmMapped(VmRange::new(ptr::null_mut(), 4096));
        unsafe { dispatcher.fire(&mut event) };
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_disabled_events_pass_through() {
        let config = Config::builder().events(EventType::MMAP).build();
        let dispatcher = Dispatcher::with_config(MockGateway::new(), config);
        assert_eq!(
            dispatcher.register_handler(
                EventType::SBRK,
                0,
                Arc::new(CountingHandler::new())
            ),
            Err(MemHookError::Unsupported(EventType::SBRK))
        );
        let prev = unsafe { dispatcher.sbrk(16) };
        assert_eq!(prev as usize, MockGateway::BRK_BASE);
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_invalid_mask_wins_over_config() {
        let config = Config::builder().enable_events(false).build();
        let dispatcher = Dispatcher::with_config(MockGateway::new(), config);
        let err = dispatcher
            .register_handler(EventType::empty(), 0, Arc::new(CountingHandler::new()))
            .unwrap_err();
        assert!(matches!(err, MemHookError::InvalidArgument(_)));
    }

    #[test]
    fn test_recursion_guard_bypasses_chain() {
        let dispatcher = Arc::new(mock());
        let counter = Arc::new(CountingHandler::new());
        let inner = Arc::downgrade(&dispatcher);
        let count = counter.clone();
        dispatcher
            .register_handler(
                EventType::MMAP,
                -1,
                Arc::new(move |event_type: EventType, event: &mut Event| {
                    count.on_event(event_type, event);
                    if let Some(dispatcher) = inner.upgrade() {
                        let nested = unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
                        assert_ne!(nested, FAILED);
                    }
                }),
            )
            .unwrap();

        unsafe { dispatcher.mmap(ptr::null_mut(), 4096, 0, 0, -1, 0) };
        // The nested call ran the genuine operation only.
        assert_eq!(counter.count(), 1);
        assert_eq!(dispatcher.gateway().calls(EventKind::Mmap), 2);
        dispatcher.clear();
    }

    #[test]
    fn test_recursion_guard_keeps_aggregates() {
        let dispatcher = Arc::new(mock());
        let log = EventLog::new();
        let inner = Arc::downgrade(&dispatcher);
        dispatcher
            .register_handler(
                EventType::MUNMAP,
                -1,
                Arc::new(move |_: EventType, event: &mut Event| {
                    let Event::Munmap(e) = event else { return };
                    if e.address as usize != 0x10000 {
                        return;
                    }
                    if let Some(dispatcher) = inner.upgrade() {
                        assert_eq!(unsafe { dispatcher.munmap(0x80000 as *mut c_void, 4096) }, 0);
                    }
                }),
            )
            .unwrap();
        record(&dispatcher, &log, "unmapped", EventType::VM_UNMAPPED, 0);

        unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        let ranges: Vec<_> = log.records().iter().filter_map(|r| r.event.range()).collect();
        assert_eq!(
            ranges,
            vec![
                VmRange::new(0x80000 as *mut c_void, 4096),
                VmRange::new(0x10000 as *mut c_void, 4096),
            ]
        );
        assert_eq!(dispatcher.gateway().calls(EventKind::Munmap), 2);
        dispatcher.clear();
    }

    #[test]
    fn test_aggregate_handler_reentry_is_not_redelivered() {
        let dispatcher = Arc::new(mock());
        let counter = Arc::new(CountingHandler::new());
        let inner = Arc::downgrade(&dispatcher);
        let count = counter.clone();
        dispatcher
            .register_handler(
                EventType::VM_UNMAPPED,
                0,
                Arc::new(move |event_type: EventType, event: &mut Event| {
                    count.on_event(event_type, event);
                    if let Some(dispatcher) = inner.upgrade() {
                        unsafe { dispatcher.munmap(0x90000 as *mut c_void, 4096) };
                    }
                }),
            )
            .unwrap();

        unsafe { dispatcher.munmap(0x10000 as *mut c_void, 4096) };
        assert_eq!(counter.count(), 1);
        assert_eq!(dispatcher.gateway().calls(EventKind::Munmap), 2);
        dispatcher.clear();
    }

    #[test]
    fn test_unset_event_handler() {
        fn handler(_: EventType, _: &mut Event, arg: *mut c_void) {
            let counter = unsafe { &*(arg as *const CountingHandler) };
            counter.on_event(EventType::SBRK, &mut Event::Sbrk(SbrkEvent::new(0)));
        }

        static COUNTER: CountingHandler = CountingHandler::new();
        let arg = &COUNTER as *const CountingHandler as *mut c_void;

        let dispatcher = mock();
        dispatcher
            .set_event_handler(EventType::SBRK, 0, handler, arg)
            .unwrap();
        unsafe { dispatcher.sbrk(8) };
        dispatcher.unset_event_handler(EventType::SBRK, handler, arg);
        unsafe { dispatcher.sbrk(8) };
        assert_eq!(COUNTER.count(), 1);
    }
}
