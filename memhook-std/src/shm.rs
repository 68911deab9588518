//! Shared memory attachment table.
//!
//! `shmdt()` only receives an address, so the size of the detached range has
//! to be remembered from the matching `shmat()`. The table is a fixed array
//! of atomic slots: it is filled and drained from dispatch context, where
//! neither locks nor allocation are allowed.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of simultaneously tracked attachments.
pub const SHM_SLOTS: usize = 256;

const FREE: usize = 0;
const RESERVED: usize = 1;

struct Slot {
    address: AtomicUsize,
    size: AtomicUsize,
}

impl Slot {
    const fn new() -> Self {
        Self {
            address: AtomicUsize::new(FREE),
            size: AtomicUsize::new(0),
        }
    }
}

/// Lock-free map from attach address to attached size.
pub struct ShmTable {
    slots: [Slot; SHM_SLOTS],
}

impl ShmTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::new() }; SHM_SLOTS],
        }
    }

    /// Remember that `size` bytes are attached at `address`.
    ///
    /// Returns `false` if the table is full; the attachment is then not
    /// tracked and its detach will produce no unmapped event.
    pub fn insert(&self, address: usize, size: usize) -> bool {
        if address <= RESERVED {
            return false;
        }
        for slot in &self.slots {
            if slot
                .address
                .compare_exchange(FREE, RESERVED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.size.store(size, Ordering::Release);
                slot.address.store(address, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Size of the attachment at `address`, if tracked.
    pub fn get(&self, address: usize) -> Option<usize> {
        if address <= RESERVED {
            return None;
        }
        self.slots
            .iter()
            .find(|slot| slot.address.load(Ordering::Acquire) == address)
            .map(|slot| slot.size.load(Ordering::Acquire))
    }

    /// Forget the attachment at `address` and return its size.
    pub fn remove(&self, address: usize) -> Option<usize> {
        if address <= RESERVED {
            return None;
        }
        for slot in &self.slots {
            if slot
                .address
                .compare_exchange(address, RESERVED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let size = slot.size.load(Ordering::Acquire);
                slot.address.store(FREE, Ordering::Release);
                return Some(size);
            }
        }
        None
    }

    /// Number of tracked attachments.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.address.load(Ordering::Acquire) > RESERVED)
            .count()
    }

    /// Whether no attachment is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShmTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShmTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmTable")
            .field("attached", &self.len())
            .finish()
    }
}
