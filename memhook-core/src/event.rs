//! Event type bits.
//!
//! Every address-space change is announced as one bit of [`EventType`].
//! The six native bits correspond to the intercepted primitives; the two
//! aggregate bits are synthesized from successful native events and can only
//! be observed, never fired directly.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// A set of memory event types.
    ///
    /// Registration takes a mask so one handler can subscribe to several
    /// events at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventType: u32 {
        /// `mmap()` is called.
        const MMAP = 1 << 0;
        /// `munmap()` is called.
        const MUNMAP = 1 << 1;
        /// `mremap()` is called.
        const MREMAP = 1 << 2;
        /// `shmat()` is called.
        const SHMAT = 1 << 3;
        /// `shmdt()` is called.
        const SHMDT = 1 << 4;
        /// `sbrk()` is called.
        const SBRK = 1 << 5;

        /// An address range appeared in the process address space.
        ///
        /// Fired after the native operation completed.
        const VM_MAPPED = 1 << 16;
        /// An address range disappears from the process address space.
        ///
        /// Fired right before the genuine operation, while the range is
        /// still mapped.
        const VM_UNMAPPED = 1 << 17;

        /// All native events.
        const NATIVE = Self::MMAP.bits()
            | Self::MUNMAP.bits()
            | Self::MREMAP.bits()
            | Self::SHMAT.bits()
            | Self::SHMDT.bits()
            | Self::SBRK.bits();

        /// All aggregate (read-only) events.
        const AGGREGATE = Self::VM_MAPPED.bits() | Self::VM_UNMAPPED.bits();
    }
}

impl EventType {
    /// Iterate over the single-event kinds contained in this mask.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.bit()))
    }

    /// Whether this mask contains at least one aggregate bit.
    pub fn has_aggregate(self) -> bool {
        self.intersects(Self::AGGREGATE)
    }

    /// Parse a single event name as used in configuration, e.g. `"mmap"` or
    /// `"vm_unmapped"`.
    pub fn parse_name(name: &str) -> Option<Self> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
            .map(EventKind::bit)
    }
}

/// One event type, used to index chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// See [`EventType::MMAP`].
    Mmap,
    /// See [`EventType::MUNMAP`].
    Munmap,
    /// See [`EventType::MREMAP`].
    Mremap,
    /// See [`EventType::SHMAT`].
    Shmat,
    /// See [`EventType::SHMDT`].
    Shmdt,
    /// See [`EventType::SBRK`].
    Sbrk,
    /// See [`EventType::VM_MAPPED`].
    VmMapped,
    /// See [`EventType::VM_UNMAPPED`].
    VmUnmapped,
}

impl EventKind {
    /// Number of distinct event kinds.
    pub const COUNT: usize = 8;

    /// Every kind, in chain index order.
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::Mmap,
        EventKind::Munmap,
        EventKind::Mremap,
        EventKind::Shmat,
        EventKind::Shmdt,
        EventKind::Sbrk,
        EventKind::VmMapped,
        EventKind::VmUnmapped,
    ];

    /// The bit for this kind.
    pub const fn bit(self) -> EventType {
        match self {
            EventKind::Mmap => EventType::MMAP,
            EventKind::Munmap => EventType::MUNMAP,
            EventKind::Mremap => EventType::MREMAP,
            EventKind::Shmat => EventType::SHMAT,
            EventKind::Shmdt => EventType::SHMDT,
            EventKind::Sbrk => EventType::SBRK,
            EventKind::VmMapped => EventType::VM_MAPPED,
            EventKind::VmUnmapped => EventType::VM_UNMAPPED,
        }
    }

    /// Dense index in `0..COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this kind is one of the synthesized read-only events.
    pub const fn is_aggregate(self) -> bool {
        matches!(self, EventKind::VmMapped | EventKind::VmUnmapped)
    }

    /// Aggregate events a successful native event of this kind can produce.
    ///
    /// Empty for aggregate kinds.
    pub const fn aggregates(self) -> EventType {
        match self {
            EventKind::Mmap | EventKind::Shmat => EventType::VM_MAPPED,
            EventKind::Munmap | EventKind::Shmdt => EventType::VM_UNMAPPED,
            EventKind::Mremap | EventKind::Sbrk => EventType::AGGREGATE,
            EventKind::VmMapped | EventKind::VmUnmapped => EventType::empty(),
        }
    }

    /// Lower-case name of the event.
    pub const fn name(self) -> &'static str {
        match self {
            EventKind::Mmap => "mmap",
            EventKind::Munmap => "munmap",
            EventKind::Mremap => "mremap",
            EventKind::Shmat => "shmat",
            EventKind::Shmdt => "shmdt",
            EventKind::Sbrk => "sbrk",
            EventKind::VmMapped => "vm_mapped",
            EventKind::VmUnmapped => "vm_unmapped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        kind.bit()
    }
}
