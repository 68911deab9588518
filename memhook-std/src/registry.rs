//! Registry of event handlers.
//!
//! The registry keeps one ordered chain per event kind. Writers (register,
//! unregister) are serialized by a mutex; they build a complete new
//! [`Snapshot`] of every chain and publish it with a single atomic pointer
//! swap. Readers never lock and never allocate: [`Registry::read`] bumps a
//! reader count and borrows whatever snapshot is current.
//!
//! Replaced snapshots are retired, not freed. A retired snapshot is
//! reclaimed once the reader count has been observed at zero after its
//! retirement: any dispatch that started afterwards can only have loaded a
//! newer snapshot. Every writer operation, including [`Registry::len`],
//! attempts reclamation. Once [`MAX_RETIRED`] snapshots are pending, a
//! publishing writer yields for a bounded time waiting for readers to drain.

use libc::c_void;
use memhook_core::{
    Callback, Event, EventKind, EventType, ForeignCallback, Handler, MemHookError,
};
use std::{
    fmt,
    ops::Deref,
    ptr::{self, NonNull},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicPtr, AtomicUsize, Ordering},
    },
};

/// Number of retired snapshots after which publishing waits for readers.
pub const MAX_RETIRED: usize = 32;

// Yields a publishing writer spends waiting once `MAX_RETIRED` is reached.
// Bounded, so a registration made from inside a handler still completes.
const RETIRE_SPINS: usize = 1024;

/// Reference to the code a handler entry invokes.
///
/// Two references are the same registration when they point at the same
/// function with the same argument, or at the same handler object.
#[derive(Clone)]
pub enum HandlerRef {
    /// A Rust function with an opaque argument.
    Fn {
        /// The callback.
        callback: Callback,
        /// Argument passed back to the callback.
        arg: *mut c_void,
    },
    /// A C function with an opaque argument.
    Foreign {
        /// The callback.
        callback: ForeignCallback,
        /// Argument passed back to the callback.
        arg: *mut c_void,
    },
    /// A shared handler object.
    Object(Arc<dyn Handler>),
    /// A handler with static storage, e.g. one generated by a macro.
    Static(&'static dyn Handler),
}

// The argument pointers are opaque to the registry; keeping them valid for
// other threads is the registrant's responsibility, as with any C callback.
unsafe impl Send for HandlerRef {}
unsafe impl Sync for HandlerRef {}

impl HandlerRef {
    /// Invoke the handler.
    #[inline]
    pub fn invoke(&self, event_type: EventType, event: &mut Event) {
        match self {
            HandlerRef::Fn { callback, arg } => callback(event_type, event, *arg),
            HandlerRef::Foreign { callback, arg } => {
                // SAFETY: the registrant promised the callback accepts these
                // arguments; `event` is a valid exclusive pointer for the call.
                unsafe { callback(event_type.bits(), event, *arg) }
            }
            HandlerRef::Object(handler) => handler.on_event(event_type, event),
            HandlerRef::Static(handler) => handler.on_event(event_type, event),
        }
    }

    /// Whether `self` and `other` identify the same registration.
    pub fn same(&self, other: &HandlerRef) -> bool {
        match (self, other) {
            (
                HandlerRef::Fn { callback: a, arg: x },
                HandlerRef::Fn { callback: b, arg: y },
            ) => ptr::fn_addr_eq(*a, *b) && x == y,
            (
                HandlerRef::Foreign { callback: a, arg: x },
                HandlerRef::Foreign { callback: b, arg: y },
            ) => ptr::fn_addr_eq(*a, *b) && x == y,
            (HandlerRef::Object(a), HandlerRef::Object(b)) => Arc::ptr_eq(a, b),
            (HandlerRef::Static(a), HandlerRef::Static(b)) => {
                ptr::addr_eq(*a as *const dyn Handler, *b as *const dyn Handler)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Fn { callback, arg } => f
                .debug_struct("Fn")
                .field("callback", &(*callback as *const ()))
                .field("arg", arg)
                .finish(),
            HandlerRef::Foreign { callback, arg } => f
                .debug_struct("Foreign")
                .field("callback", &(*callback as *const ()))
                .field("arg", arg)
                .finish(),
            HandlerRef::Object(handler) => f
                .debug_tuple("Object")
                .field(&Arc::as_ptr(handler).cast::<()>())
                .finish(),
            HandlerRef::Static(handler) => f
                .debug_tuple("Static")
                .field(&(*handler as *const dyn Handler).cast::<()>())
                .finish(),
        }
    }
}

/// One registration as stored in the chains.
#[derive(Debug)]
pub struct HandlerEntry {
    events: EventType,
    priority: i32,
    seq: u64,
    handler: HandlerRef,
}

impl HandlerEntry {
    /// Events this entry is currently subscribed to.
    pub fn events(&self) -> EventType {
        self.events
    }

    /// Priority of the entry. Negative priorities run before the genuine
    /// operation, non-negative ones after it.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Registration sequence number, used to break priority ties.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The handler reference.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// Invoke the handler.
    #[inline]
    pub fn invoke(&self, event_type: EventType, event: &mut Event) {
        self.handler.invoke(event_type, event)
    }
}

/// An immutable set of chains, one per event kind, each sorted by
/// `(priority, seq)`.
#[derive(Debug, Default)]
pub struct Snapshot {
    chains: [Vec<Arc<HandlerEntry>>; EventKind::COUNT],
}

impl Snapshot {
    fn build(entries: &[Arc<HandlerEntry>]) -> Result<Box<Snapshot>, MemHookError> {
        let mut snapshot = Snapshot::default();
        for kind in EventKind::ALL {
            let chain = &mut snapshot.chains[kind.index()];
            let subscribed = entries
                .iter()
                .filter(|entry| entry.events.contains(kind.bit()));
            chain
                .try_reserve_exact(subscribed.clone().count())
                .map_err(|_| MemHookError::OutOfMemory)?;
            chain.extend(subscribed.cloned());
            chain.sort_by_key(|entry| (entry.priority, entry.seq));
        }
        Ok(Box::new(snapshot))
    }

    /// The ordered chain for one event kind.
    #[inline]
    pub fn chain(&self, kind: EventKind) -> &[Arc<HandlerEntry>] {
        &self.chains[kind.index()]
    }
}

struct Retired(NonNull<Snapshot>);

// Retired snapshots are only touched by the writer holding the lock.
unsafe impl Send for Retired {}

#[derive(Default)]
struct Writer {
    entries: Vec<Arc<HandlerEntry>>,
    next_seq: u64,
    retired: Vec<Retired>,
}

/// The handler registry.
pub struct Registry {
    current: AtomicPtr<Snapshot>,
    readers: AtomicUsize,
    writer: Mutex<Writer>,
}

// SAFETY: the published snapshot is immutable and only freed by the writer
// after a grace period; all other state is behind the writer mutex.
unsafe impl Send for Registry {}
unsafe impl Sync for Registry {}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            current: AtomicPtr::new(Box::into_raw(Box::default())),
            readers: AtomicUsize::new(0),
            writer: Mutex::new(Writer::default()),
        }
    }

    /// Borrow the current snapshot.
    ///
    /// Never blocks and never allocates. The snapshot stays valid while the
    /// guard lives, even if writers publish newer ones meanwhile.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.current.load(Ordering::SeqCst);
        // SAFETY: the pointer was published by `new` or `publish` and cannot
        // be reclaimed while `readers` is non-zero.
        let snapshot = unsafe { &*snapshot };
        ReadGuard {
            registry: self,
            snapshot,
        }
    }

    /// Check that `events` is a non-empty mask of known events.
    pub fn validate(events: EventType) -> Result<(), MemHookError> {
        if events.is_empty() {
            return Err(MemHookError::InvalidArgument("empty event mask"));
        }
        let unknown = events.bits() & !EventType::all().bits();
        if unknown != 0 {
            return Err(MemHookError::UnknownEvents(unknown));
        }
        Ok(())
    }

    /// Add `handler` to the chain of every event in `events`.
    ///
    /// Either every requested chain gains the entry or none does.
    pub fn register(
        &self,
        events: EventType,
        priority: i32,
        handler: HandlerRef,
    ) -> Result<(), MemHookError> {
        Self::validate(events)?;

        let mut writer = self.lock();
        if writer
            .entries
            .iter()
            .any(|entry| entry.events.intersects(events) && entry.handler.same(&handler))
        {
            return Err(MemHookError::InvalidArgument(
                "handler already registered for these events",
            ));
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(writer.entries.len() + 1)
            .map_err(|_| MemHookError::OutOfMemory)?;
        writer
            .retired
            .try_reserve(1)
            .map_err(|_| MemHookError::OutOfMemory)?;
        entries.extend(writer.entries.iter().cloned());

        let seq = writer.next_seq;
        entries.push(Arc::new(HandlerEntry {
            events,
            priority,
            seq,
            handler,
        }));
        let snapshot = Snapshot::build(&entries)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            events = ?events,
            priority,
            seq,
            handler = ?entries[entries.len() - 1].handler,
            "installed event handler"
        );

        writer.next_seq += 1;
        writer.entries = entries;
        self.publish(&mut writer, snapshot);
        Ok(())
    }

    /// Remove the events in `events` from every entry matching `handler`.
    ///
    /// Entries left without events are deleted. Unknown handlers are
    /// ignored.
    pub fn unregister(&self, events: EventType, handler: &HandlerRef) {
        let mut writer = self.lock();
        if !writer
            .entries
            .iter()
            .any(|entry| entry.events.intersects(events) && entry.handler.same(handler))
        {
            return;
        }

        let entries: Vec<Arc<HandlerEntry>> = writer
            .entries
            .iter()
            .filter_map(|entry| {
                if !entry.handler.same(handler) || !entry.events.intersects(events) {
                    return Some(entry.clone());
                }
                let remaining = entry.events.difference(events);
                if remaining.is_empty() {
                    return None;
                }
                Some(Arc::new(HandlerEntry {
                    events: remaining,
                    priority: entry.priority,
                    seq: entry.seq,
                    handler: entry.handler.clone(),
                }))
            })
            .collect();

        let snapshot = match Snapshot::build(&entries) {
            Ok(snapshot) => snapshot,
            Err(_) => {
                // Free retired snapshots and retry before giving up.
                self.wait_for_readers(&mut writer);
                match Snapshot::build(&entries) {
                    Ok(snapshot) => snapshot,
                    Err(_) => std::alloc::handle_alloc_error(std::alloc::Layout::new::<Snapshot>()),
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            events = ?events,
            handler = ?handler,
            remaining = entries.len(),
            "removed event handler"
        );

        writer.entries = entries;
        self.publish(&mut writer, snapshot);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        let mut writer = self.lock();
        if writer.entries.is_empty() {
            return;
        }
        writer.entries.clear();
        self.publish(&mut writer, Box::default());

        #[cfg(feature = "tracing")]
        tracing::debug!("cleared all event handlers");
    }

    /// Wait until no dispatch can still see a retired snapshot, then free
    /// them all.
    ///
    /// Must not be called from inside a handler: the calling dispatch keeps
    /// the reader count raised and this would spin forever.
    pub fn synchronize(&self) {
        let mut writer = self.lock();
        self.wait_for_readers(&mut writer);
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        let mut writer = self.lock();
        self.reclaim(&mut writer);
        writer.entries.len()
    }

    /// Number of retired snapshots not yet freed.
    pub fn retired(&self) -> usize {
        let mut writer = self.lock();
        self.reclaim(&mut writer);
        writer.retired.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of handlers in the chain of `kind`.
    pub fn chain_len(&self, kind: EventKind) -> usize {
        self.read().chain(kind).len()
    }

    /// Whether any handler subscribes to `kind`.
    pub fn subscribed(&self, kind: EventKind) -> bool {
        self.chain_len(kind) != 0
    }

    fn lock(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, writer: &mut Writer, snapshot: Box<Snapshot>) {
        let old = self.current.swap(Box::into_raw(snapshot), Ordering::SeqCst);
        if let Some(old) = NonNull::new(old) {
            writer.retired.push(Retired(old));
        }
        if self.reclaim(writer) || writer.retired.len() < MAX_RETIRED {
            return;
        }
        for _ in 0..RETIRE_SPINS {
            std::thread::yield_now();
            if self.reclaim(writer) {
                return;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            retired = writer.retired.len(),
            "readers never drained, snapshot reclamation still deferred"
        );
    }

    fn reclaim(&self, writer: &mut Writer) -> bool {
        if writer.retired.is_empty() {
            return true;
        }
        if self.readers.load(Ordering::SeqCst) != 0 {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                retired = writer.retired.len(),
                "readers active, deferring snapshot reclamation"
            );
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(count = writer.retired.len(), "reclaiming snapshots");

        for Retired(snapshot) in writer.retired.drain(..) {
            // SAFETY: the snapshot was unpublished before the reader count was
            // observed at zero, so no reader can still reference it.
            drop(unsafe { Box::from_raw(snapshot.as_ptr()) });
        }
        true
    }

    fn wait_for_readers(&self, writer: &mut Writer) {
        while !self.reclaim(writer) {
            std::thread::yield_now();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let writer = self.writer.get_mut().unwrap_or_else(|e| e.into_inner());
        for Retired(snapshot) in writer.retired.drain(..) {
            // SAFETY: `&mut self` rules out concurrent readers.
            drop(unsafe { Box::from_raw(snapshot.as_ptr()) });
        }
        let current = *self.current.get_mut();
        if !current.is_null() {
            // SAFETY: as above.
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("snapshot", &*self.read())
            .finish()
    }
}

/// A borrowed snapshot. Dropping the guard ends the read.
pub struct ReadGuard<'a> {
    registry: &'a Registry,
    snapshot: &'a Snapshot,
}

impl Deref for ReadGuard<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        self.snapshot
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.registry.readers.fetch_sub(1, Ordering::SeqCst);
    }
}
