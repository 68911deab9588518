//! Aggregate event synthesis.
//!
//! Translates native events into the address ranges that appear in or
//! disappear from the address space. Disappearing ranges are announced
//! before the genuine operation runs, from the event parameters
//! ([`Synthesizer::releasing`]); everything else is derived from the
//! completed event ([`Synthesizer::derive`]).

use crate::{gateway::Gateway, shm::ShmTable};
use libc::{c_int, c_void};
use memhook_core::{Event, EventKind, FAILED, VmRange};

/// Linux value of `MREMAP_MAYMOVE`.
pub const MREMAP_MAYMOVE: c_int = 1;

/// Up to two aggregate events derived from one native event.
///
/// Iteration yields unmapped ranges before mapped ones, so a moving
/// `mremap` reports the old range going away first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    slots: [Option<(EventKind, VmRange)>; 2],
    next: usize,
}

impl Aggregates {
    fn push(&mut self, kind: EventKind, range: VmRange) {
        if range.size == 0 {
            return;
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some((kind, range));
        }
    }

    fn mapped(mut self, address: usize, size: usize) -> Self {
        self.push(
            EventKind::VmMapped,
            VmRange::new(address as *mut c_void, size),
        );
        self
    }

    fn unmapped(mut self, address: usize, size: usize) -> Self {
        self.push(
            EventKind::VmUnmapped,
            VmRange::new(address as *mut c_void, size),
        );
        self
    }

    /// Whether nothing was derived.
    pub fn is_empty(&self) -> bool {
        self.slots[self.next..].iter().all(Option::is_none)
    }
}

impl Iterator for Aggregates {
    type Item = (EventKind, VmRange);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.slots.len() {
            let item = self.slots[self.next].take();
            self.next += 1;
            if item.is_some() {
                return item;
            }
        }
        None
    }
}

/// Derives aggregate events and tracks shared memory attachments.
#[derive(Debug, Default)]
pub struct Synthesizer {
    shm: ShmTable,
}

impl Synthesizer {
    /// Create a synthesizer with an empty attachment table.
    pub const fn new() -> Self {
        Self {
            shm: ShmTable::new(),
        }
    }

    /// The shared memory attachment table.
    pub fn shm(&self) -> &ShmTable {
        &self.shm
    }

    /// The range a pending native `event` is about to release.
    ///
    /// Called immediately before the genuine operation, while the range is
    /// still mapped. A growing `mremap` that may move announces its whole
    /// old range. Breaks that cannot be queried and unknown shared memory
    /// attachments release nothing.
    pub fn releasing<G: Gateway + ?Sized>(&self, event: &Event, gateway: &G) -> Option<VmRange> {
        let range = match event {
            Event::Munmap(e) => VmRange::new(e.address, e.size),
            Event::Mremap(e) if e.new_size < e.old_size => VmRange::new(
                (e.address as usize + e.new_size) as *mut c_void,
                e.old_size - e.new_size,
            ),
            Event::Mremap(e) if e.new_size > e.old_size && e.flags & MREMAP_MAYMOVE != 0 => {
                VmRange::new(e.address, e.old_size)
            }
            Event::Shmdt(e) => {
                let size = self.shm.get(e.shmaddr as usize)?;
                VmRange::new(e.shmaddr as *mut c_void, size)
            }
            Event::Sbrk(e) if e.increment < 0 => {
                let current = gateway.program_break();
                if current == FAILED {
                    return None;
                }
                let delta = e.increment.unsigned_abs();
                VmRange::new((current as usize).wrapping_sub(delta) as *mut c_void, delta)
            }
            _ => return None,
        };
        (range.size != 0).then_some(range)
    }

    /// Derive the aggregate events of a completed native `event`.
    ///
    /// `released` is what [`Synthesizer::releasing`] announced before the
    /// genuine operation. Disappearing ranges that were not announced, for
    /// example because a handler performed the operation itself, are
    /// reported here instead.
    ///
    /// Failed or pending events derive nothing. Successful `shmat` and
    /// `shmdt` events update the attachment table even when nothing
    /// subscribes to aggregate events.
    pub fn derive<G: Gateway + ?Sized>(
        &self,
        event: &Event,
        released: Option<VmRange>,
        gateway: &G,
    ) -> Aggregates {
        let none = Aggregates::default();
        if !event.succeeded() {
            return none;
        }
        let announced = released.is_some();

        match event {
            Event::Mmap(e) => match e.result().get() {
                Some(result) => none.mapped(result as usize, e.size),
                None => none,
            },
            Event::Munmap(e) if !announced => none.unmapped(e.address as usize, e.size),
            Event::Munmap(_) => none,
            Event::Mremap(e) => {
                let Some(result) = e.result().get() else {
                    return none;
                };
                let (old, new) = (e.old_size, e.new_size);
                let (address, result) = (e.address as usize, result as usize);
                if released == Some(VmRange::new(e.address, old)) {
                    // The whole old range is already gone.
                    none.mapped(result, new)
                } else if result != address {
                    none.unmapped(address, old).mapped(result, new)
                } else if new > old {
                    none.mapped(address + old, new - old)
                } else if !announced {
                    none.unmapped(address + new, old - new)
                } else {
                    none
                }
            }
            Event::Shmat(e) => {
                let Some(result) = e.result().get() else {
                    return none;
                };
                let Some(size) = gateway.shm_segment_size(e.shmid) else {
                    return none;
                };
                let size = round_up(size, gateway.page_size());
                self.shm.insert(result as usize, size);
                none.mapped(result as usize, size)
            }
            Event::Shmdt(e) => match self.shm.remove(e.shmaddr as usize) {
                Some(size) if !announced => none.unmapped(e.shmaddr as usize, size),
                _ => none,
            },
            Event::Sbrk(e) => {
                let Some(previous) = e.result().get() else {
                    return none;
                };
                let previous = previous as usize;
                let delta = e.increment.unsigned_abs();
                if e.increment > 0 {
                    none.mapped(previous, delta)
                } else if !announced {
                    none.unmapped(previous.wrapping_sub(delta), delta)
                } else {
                    none
                }
            }
            Event::VmMapped(_) | Event::VmUnmapped(_) => none,
        }
    }
}

fn round_up(size: usize, page: usize) -> usize {
    if page == 0 {
        return size;
    }
    size.div_ceil(page).saturating_mul(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGateway;
    use memhook_core::{MmapEvent, MremapEvent, MunmapEvent, SbrkEvent, ShmatEvent, ShmdtEvent};
    use std::ptr;

    fn addr(value: usize) -> *mut c_void {
        value as *mut c_void
    }

    fn ranges(aggregates: Aggregates) -> Vec<(EventKind, usize, usize)> {
        aggregates
            .map(|(kind, range)| (kind, range.start(), range.size))
            .collect()
    }

    // Derivation when nothing was announced beforehand.
    fn derive(event: Event) -> Vec<(EventKind, usize, usize)> {
        ranges(Synthesizer::new().derive(&event, None, &MockGateway::new()))
    }

    // Announcement before the genuine call, then derivation after it.
    fn announce_then_derive(
        mut event: Event,
        result: impl FnOnce(&mut Event),
    ) -> (Option<(usize, usize)>, Vec<(EventKind, usize, usize)>) {
        let synth = Synthesizer::new();
        let gateway = MockGateway::new();
        let released = synth.releasing(&event, &gateway);
        result(&mut event);
        let derived = ranges(synth.derive(&event, released, &gateway));
        (released.map(|r| (r.start(), r.size)), derived)
    }

    fn mremap(address: usize, old: usize, new: usize, flags: c_int) -> MremapEvent {
        MremapEvent::new(addr(address), old, new, flags)
    }

    fn mremap_done(address: usize, old: usize, new: usize, result: usize) -> Event {
        let mut e = mremap(address, old, new, 0);
        e.complete(addr(result));
        Event::Mremap(e)
    }

    #[test]
    fn test_mmap_and_unannounced_munmap() {
        let mut mmap = MmapEvent::new(ptr::null_mut(), 0x3000, 0, 0, -1, 0);
        mmap.complete(addr(0x10000));
        assert_eq!(
            derive(Event::Mmap(mmap)),
            vec![(EventKind::VmMapped, 0x10000, 0x3000)]
        );

        let mut munmap = MunmapEvent::new(addr(0x10000), 0x1000);
        munmap.complete(0);
        assert_eq!(
            derive(Event::Munmap(munmap)),
            vec![(EventKind::VmUnmapped, 0x10000, 0x1000)]
        );
    }

    #[test]
    fn test_munmap_announced_before_release() {
        let (released, after) = announce_then_derive(
            Event::Munmap(MunmapEvent::new(addr(0x10000), 0x1000)),
            |event| {
                if let Event::Munmap(e) = event {
                    e.complete(0);
                }
            },
        );
        assert_eq!(released, Some((0x10000, 0x1000)));
        assert!(after.is_empty());
    }

    #[test]
    fn test_failures_derive_nothing() {
        let mut mmap = MmapEvent::new(ptr::null_mut(), 0x3000, 0, 0, -1, 0);
        mmap.complete(FAILED);
        assert!(derive(Event::Mmap(mmap)).is_empty());

        let mut munmap = MunmapEvent::new(addr(0x10000), 0x1000);
        munmap.complete(-1);
        assert!(derive(Event::Munmap(munmap)).is_empty());

        let pending = MunmapEvent::new(addr(0x10000), 0x1000);
        assert!(derive(Event::Munmap(pending)).is_empty());
    }

    #[test]
    fn test_mremap_without_announcement() {
        assert_eq!(
            derive(mremap_done(0x10000, 0x1000, 0x3000, 0x10000)),
            vec![(EventKind::VmMapped, 0x11000, 0x2000)]
        );
        assert_eq!(
            derive(mremap_done(0x10000, 0x3000, 0x1000, 0x10000)),
            vec![(EventKind::VmUnmapped, 0x11000, 0x2000)]
        );
        assert_eq!(
            derive(mremap_done(0x10000, 0x1000, 0x2000, 0x40000)),
            vec![
                (EventKind::VmUnmapped, 0x10000, 0x1000),
                (EventKind::VmMapped, 0x40000, 0x2000),
            ]
        );
        assert!(derive(mremap_done(0x10000, 0x1000, 0x1000, 0x10000)).is_empty());
    }

    #[test]
    fn test_mremap_announcements() {
        let complete = |result: usize| {
            move |event: &mut Event| {
                if let Event::Mremap(e) = event {
                    e.complete(addr(result));
                }
            }
        };

        // Shrinking releases the tail up front.
        let (released, after) = announce_then_derive(
            Event::Mremap(mremap(0x10000, 0x3000, 0x1000, 0)),
            complete(0x10000),
        );
        assert_eq!(released, Some((0x11000, 0x2000)));
        assert!(after.is_empty());

        // Growing in place releases nothing.
        let (released, after) = announce_then_derive(
            Event::Mremap(mremap(0x10000, 0x1000, 0x3000, 0)),
            complete(0x10000),
        );
        assert_eq!(released, None);
        assert_eq!(after, vec![(EventKind::VmMapped, 0x11000, 0x2000)]);

        // A growth that may move releases the old range, whatever happens.
        let (released, after) = announce_then_derive(
            Event::Mremap(mremap(0x10000, 0x1000, 0x3000, MREMAP_MAYMOVE)),
            complete(0x40000),
        );
        assert_eq!(released, Some((0x10000, 0x1000)));
        assert_eq!(after, vec![(EventKind::VmMapped, 0x40000, 0x3000)]);

        let (_, after) = announce_then_derive(
            Event::Mremap(mremap(0x10000, 0x1000, 0x3000, MREMAP_MAYMOVE)),
            complete(0x10000),
        );
        assert_eq!(after, vec![(EventKind::VmMapped, 0x10000, 0x3000)]);
    }

    #[test]
    fn test_sbrk_variants() {
        let mut grow = SbrkEvent::new(0x2000);
        grow.complete(addr(0x50000));
        assert_eq!(
            derive(Event::Sbrk(grow)),
            vec![(EventKind::VmMapped, 0x50000, 0x2000)]
        );

        let mut shrink = SbrkEvent::new(-0x1000);
        shrink.complete(addr(0x52000));
        assert_eq!(
            derive(Event::Sbrk(shrink)),
            vec![(EventKind::VmUnmapped, 0x51000, 0x1000)]
        );

        let mut query = SbrkEvent::new(0);
        query.complete(addr(0x52000));
        assert!(derive(Event::Sbrk(query)).is_empty());
    }

    #[test]
    fn test_sbrk_shrink_announced_from_current_break() {
        let synth = Synthesizer::new();
        let gateway = MockGateway::new();
        unsafe { gateway.sbrk(0x4000) };

        let event = Event::Sbrk(SbrkEvent::new(-0x1000));
        let released = synth.releasing(&event, &gateway);
        assert_eq!(
            released,
            Some(VmRange::new(addr(MockGateway::BRK_BASE + 0x3000), 0x1000))
        );
        // Querying the break is not a genuine sbrk.
        assert_eq!(gateway.calls(EventKind::Sbrk), 1);
        assert_eq!(synth.releasing(&Event::Sbrk(SbrkEvent::new(8)), &gateway), None);
    }

    #[test]
    fn test_shm_attach_detach() {
        let synth = Synthesizer::new();
        let gateway = MockGateway::new().with_shm_size(5000);

        let mut shmat = ShmatEvent::new(3, ptr::null(), 0);
        shmat.complete(addr(0x70000));
        let mapped: Vec<_> = synth.derive(&Event::Shmat(shmat), None, &gateway).collect();
        assert_eq!(
            mapped,
            vec![(EventKind::VmMapped, VmRange::new(addr(0x70000), 8192))]
        );
        assert_eq!(synth.shm().len(), 1);

        let pending = Event::Shmdt(ShmdtEvent::new(addr(0x70000)));
        let released = synth.releasing(&pending, &gateway);
        assert_eq!(released, Some(VmRange::new(addr(0x70000), 8192)));
        // Announcing does not forget the attachment.
        assert_eq!(synth.shm().len(), 1);

        let mut failed = ShmdtEvent::new(addr(0x70000));
        failed.complete(-1);
        assert!(synth.derive(&Event::Shmdt(failed), released, &gateway).is_empty());
        assert_eq!(synth.shm().len(), 1);

        let mut shmdt = ShmdtEvent::new(addr(0x70000));
        shmdt.complete(0);
        assert!(synth.derive(&Event::Shmdt(shmdt), released, &gateway).is_empty());
        assert!(synth.shm().is_empty());

        // A second detach of the same address is unknown.
        assert_eq!(synth.releasing(&pending, &gateway), None);
        assert!(synth.derive(&Event::Shmdt(shmdt), None, &gateway).is_empty());
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(0, 4096), 0);
        assert_eq!(round_up(10, 0), 10);
    }
}
