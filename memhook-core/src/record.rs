//! Event records.
//!
//! A record holds the parameters of one intercepted call, verbatim from the
//! call site, together with its [`Outcome`]. Records live on the stack of the
//! dispatching thread for exactly one dispatch.

use crate::{
    event::{EventKind, EventType},
    outcome::Outcome,
};
use libc::{c_int, c_void, off_t};

/// Value returned by the pointer-returning primitives on failure.
pub const FAILED: *mut c_void = libc::MAP_FAILED;

macro_rules! result_accessors {
    ($ty:ty) => {
        /// The current result of the event.
        pub fn result(&self) -> Outcome<$ty> {
            self.result
        }

        /// Set the result if none was produced yet.
        ///
        /// Only a handler that actually performed the operation should call
        /// this. Returns `false` if a result already exists.
        pub fn complete(&mut self, value: $ty) -> bool {
            self.result.complete(value)
        }

        /// Produce the result with `f` unless one already exists.
        pub fn complete_with(&mut self, f: impl FnOnce(&Self) -> $ty) -> bool {
            if self.result.is_done() {
                return false;
            }
            let value = f(self);
            self.result.complete(value)
        }
    };
}

/// Parameters and result of `mmap()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapEvent {
    /// Requested address hint.
    pub address: *mut c_void,
    /// Length of the mapping.
    pub size: usize,
    /// Protection flags.
    pub prot: c_int,
    /// Mapping flags.
    pub flags: c_int,
    /// File descriptor.
    pub fd: c_int,
    /// Offset into the file.
    pub offset: off_t,
    result: Outcome<*mut c_void>,
}

impl MmapEvent {
    /// Build a pending record.
    pub fn new(
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> Self {
        Self {
            address,
            size,
            prot,
            flags,
            fd,
            offset,
            result: Outcome::Pending,
        }
    }

    result_accessors!(*mut c_void);
}

/// Parameters and result of `munmap()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MunmapEvent {
    /// Start of the range.
    pub address: *mut c_void,
    /// Length of the range.
    pub size: usize,
    result: Outcome<c_int>,
}

impl MunmapEvent {
    /// Build a pending record.
    pub fn new(address: *mut c_void, size: usize) -> Self {
        Self {
            address,
            size,
            result: Outcome::Pending,
        }
    }

    result_accessors!(c_int);
}

/// Parameters and result of `mremap()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MremapEvent {
    /// Old mapping address.
    pub address: *mut c_void,
    /// Old mapping size.
    pub old_size: usize,
    /// Requested size.
    pub new_size: usize,
    /// `MREMAP_*` flags.
    pub flags: c_int,
    result: Outcome<*mut c_void>,
}

impl MremapEvent {
    /// Build a pending record.
    pub fn new(address: *mut c_void, old_size: usize, new_size: usize, flags: c_int) -> Self {
        Self {
            address,
            old_size,
            new_size,
            flags,
            result: Outcome::Pending,
        }
    }

    result_accessors!(*mut c_void);
}

/// Parameters and result of `shmat()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmatEvent {
    /// Segment identifier.
    pub shmid: c_int,
    /// Requested attach address.
    pub shmaddr: *const c_void,
    /// `SHM_*` flags.
    pub shmflg: c_int,
    result: Outcome<*mut c_void>,
}

impl ShmatEvent {
    /// Build a pending record.
    pub fn new(shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> Self {
        Self {
            shmid,
            shmaddr,
            shmflg,
            result: Outcome::Pending,
        }
    }

    result_accessors!(*mut c_void);
}

/// Parameters and result of `shmdt()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmdtEvent {
    /// Attach address being detached.
    pub shmaddr: *const c_void,
    result: Outcome<c_int>,
}

impl ShmdtEvent {
    /// Build a pending record.
    pub fn new(shmaddr: *const c_void) -> Self {
        Self {
            shmaddr,
            result: Outcome::Pending,
        }
    }

    result_accessors!(c_int);
}

/// Parameters and result of `sbrk()`.
///
/// The result is the previous program break.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbrkEvent {
    /// Signed break increment.
    pub increment: isize,
    result: Outcome<*mut c_void>,
}

impl SbrkEvent {
    /// Build a pending record.
    pub fn new(increment: isize) -> Self {
        Self {
            increment,
            result: Outcome::Pending,
        }
    }

    result_accessors!(*mut c_void);
}

/// An address range carried by the aggregate events. It has no result.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmRange {
    /// Start of the range.
    pub address: *mut c_void,
    /// Length of the range in bytes.
    pub size: usize,
}

// A range is an address and a length; the engine never dereferences it.
unsafe impl Send for VmRange {}
unsafe impl Sync for VmRange {}

impl VmRange {
    /// Create a range.
    pub fn new(address: *mut c_void, size: usize) -> Self {
        Self { address, size }
    }

    /// Start address as an integer.
    pub fn start(&self) -> usize {
        self.address as usize
    }

    /// One past the last byte.
    pub fn end(&self) -> usize {
        self.start().wrapping_add(self.size)
    }
}

/// A memory event as seen by handlers.
#[repr(C, u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// See [`EventType::MMAP`].
    Mmap(MmapEvent),
    /// See [`EventType::MUNMAP`].
    Munmap(MunmapEvent),
    /// See [`EventType::MREMAP`].
    Mremap(MremapEvent),
    /// See [`EventType::SHMAT`].
    Shmat(ShmatEvent),
    /// See [`EventType::SHMDT`].
    Shmdt(ShmdtEvent),
    /// See [`EventType::SBRK`].
    Sbrk(SbrkEvent),
    /// See [`EventType::VM_MAPPED`].
    VmMapped(VmRange),
    /// See [`EventType::VM_UNMAPPED`].
    VmUnmapped(VmRange),
}

// Records are plain parameter snapshots; the pointers they carry are
// addresses, never dereferenced by the engine.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Mmap(_) => EventKind::Mmap,
            Event::Munmap(_) => EventKind::Munmap,
            Event::Mremap(_) => EventKind::Mremap,
            Event::Shmat(_) => EventKind::Shmat,
            Event::Shmdt(_) => EventKind::Shmdt,
            Event::Sbrk(_) => EventKind::Sbrk,
            Event::VmMapped(_) => EventKind::VmMapped,
            Event::VmUnmapped(_) => EventKind::VmUnmapped,
        }
    }

    /// The event type bit of this event.
    pub fn event_type(&self) -> EventType {
        self.kind().bit()
    }

    /// Whether this is a synthesized read-only event.
    pub fn is_aggregate(&self) -> bool {
        self.kind().is_aggregate()
    }

    /// Whether a result was produced. Aggregate events have none.
    pub fn is_done(&self) -> bool {
        match self {
            Event::Mmap(e) => e.result().is_done(),
            Event::Munmap(e) => e.result().is_done(),
            Event::Mremap(e) => e.result().is_done(),
            Event::Shmat(e) => e.result().is_done(),
            Event::Shmdt(e) => e.result().is_done(),
            Event::Sbrk(e) => e.result().is_done(),
            Event::VmMapped(_) | Event::VmUnmapped(_) => false,
        }
    }

    /// Whether the produced result reports success, using the convention of
    /// the underlying primitive.
    ///
    /// Pending results and aggregate events report `false`.
    pub fn succeeded(&self) -> bool {
        match self {
            Event::Mmap(e) => e.result().get().is_some_and(|r| r != FAILED),
            Event::Munmap(e) => e.result().get() == Some(0),
            Event::Mremap(e) => e.result().get().is_some_and(|r| r != FAILED),
            Event::Shmat(e) => e.result().get().is_some_and(|r| r != FAILED),
            Event::Shmdt(e) => e.result().get() == Some(0),
            Event::Sbrk(e) => e.result().get().is_some_and(|r| r != FAILED),
            Event::VmMapped(_) | Event::VmUnmapped(_) => false,
        }
    }

    /// The address range of an aggregate event.
    pub fn range(&self) -> Option<VmRange> {
        match self {
            Event::VmMapped(range) | Event::VmUnmapped(range) => Some(*range),
            _ => None,
        }
    }
}
