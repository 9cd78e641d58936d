//! Generational arena for timer entities and index-linked bucket lists.
//!
//! Entities live in one flat store per wheel; buckets reference them by
//! index and membership is a doubly-linked list threaded through the
//! entities' own `prev`/`next` fields. Nothing in a bucket owns anything,
//! so push/remove are allocation-free and O(1), and the store can grow
//! without invalidating any membership back-reference (indices are stable
//! where interior pointers would not be).
//!
//! Every slot carries a generation counter, bumped when the slot is
//! vacated, so a handle to a recycled entity is detectable instead of
//! silently aliasing the new occupant.

use crate::entry::TimerEntry;

/// Index of an entity slot in a [`TimerSlab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntryIndex(u32);

impl EntryIndex {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

enum Slot {
    Occupied { generation: u32, entry: TimerEntry },
    Free { generation: u32, next: Option<EntryIndex> },
}

/// Growable slab of timer entities.
///
/// The slab only stores; recycling policy (which free slot to hand out
/// next, and the freshly-allocated count) belongs to the
/// [`TimerPool`](crate::pool::TimerPool) driving it.
pub struct TimerSlab {
    slots: Vec<Slot>,
}

impl TimerSlab {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of slots (occupied and free).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Appends a brand-new occupied slot.
    ///
    /// # Panics
    ///
    /// Panics if the slab would exceed `u32::MAX` slots.
    pub fn alloc_fresh(&mut self, entry: TimerEntry) -> EntryIndex {
        let idx = u32::try_from(self.slots.len()).expect("timer slab exceeds u32::MAX slots");
        self.slots.push(Slot::Occupied {
            generation: 0,
            entry,
        });
        EntryIndex(idx)
    }

    /// Re-occupies a free slot with `entry`, keeping its generation.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already occupied; only free slots may be
    /// handed out for reuse.
    pub fn occupy(&mut self, idx: EntryIndex, entry: TimerEntry) {
        let slot = &mut self.slots[idx.index()];
        match slot {
            Slot::Free { generation, .. } => {
                let generation = *generation;
                *slot = Slot::Occupied { generation, entry };
            }
            Slot::Occupied { .. } => panic!("occupy on an occupied slab slot"),
        }
    }

    /// Vacates an occupied slot, bumping its generation and linking it into
    /// a free list via `next_free`. Returns the evicted entity so the
    /// caller drops its captures outside any residual bookkeeping.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already free.
    pub fn vacate(&mut self, idx: EntryIndex, next_free: Option<EntryIndex>) -> TimerEntry {
        let slot = &mut self.slots[idx.index()];
        match std::mem::replace(
            slot,
            Slot::Free {
                generation: 0,
                next: next_free,
            },
        ) {
            Slot::Occupied { generation, entry } => {
                *slot = Slot::Free {
                    generation: generation.wrapping_add(1),
                    next: next_free,
                };
                entry
            }
            free @ Slot::Free { .. } => {
                *slot = free;
                panic!("vacate on a free slab slot");
            }
        }
    }

    /// The generation of an occupied slot; `None` if the slot is free.
    #[must_use]
    pub fn generation(&self, idx: EntryIndex) -> Option<u32> {
        match self.slots.get(idx.index()) {
            Some(Slot::Occupied { generation, .. }) => Some(*generation),
            _ => None,
        }
    }

    /// The free-list successor recorded in a free slot.
    #[must_use]
    pub fn free_next(&self, idx: EntryIndex) -> Option<EntryIndex> {
        match self.slots.get(idx.index()) {
            Some(Slot::Free { next, .. }) => *next,
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, idx: EntryIndex) -> Option<&TimerEntry> {
        match self.slots.get(idx.index()) {
            Some(Slot::Occupied { entry, .. }) => Some(entry),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: EntryIndex) -> Option<&mut TimerEntry> {
        match self.slots.get_mut(idx.index()) {
            Some(Slot::Occupied { entry, .. }) => Some(entry),
            _ => None,
        }
    }
}

impl Default for TimerSlab {
    fn default() -> Self {
        Self::new()
    }
}

/// One bucket: a doubly-linked list of entities threaded through the slab.
///
/// Owns no entities, only the head/tail indices. Insertion order is
/// preserved; no other ordering among siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketList {
    head: Option<EntryIndex>,
    tail: Option<EntryIndex>,
}

impl BucketList {
    pub(crate) const EMPTY: Self = Self {
        head: None,
        tail: None,
    };

    /// Appends a detached entity. The entity's links must be clear.
    pub(crate) fn push_back(&mut self, slab: &mut TimerSlab, idx: EntryIndex) {
        debug_assert!(slab.get(idx).is_some_and(|e| e.prev.is_none() && e.next.is_none()));
        match self.tail {
            Some(tail) => {
                if let Some(t) = slab.get_mut(tail) {
                    t.next = Some(idx);
                }
                if let Some(e) = slab.get_mut(idx) {
                    e.prev = Some(tail);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Unlinks an entity the caller guarantees is a member of this list,
    /// clearing its links.
    pub(crate) fn remove(&mut self, slab: &mut TimerSlab, idx: EntryIndex) {
        let (prev, next) = match slab.get_mut(idx) {
            Some(e) => (e.prev.take(), e.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(e) = slab.get_mut(p) {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = slab.get_mut(n) {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    pub(crate) fn front(&self) -> Option<EntryIndex> {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab_with(n: usize) -> (TimerSlab, Vec<EntryIndex>) {
        let mut slab = TimerSlab::new();
        let idxs = (0..n).map(|_| slab.alloc_fresh(TimerEntry::blank())).collect();
        (slab, idxs)
    }

    fn collect(list: &BucketList, slab: &TimerSlab) -> Vec<EntryIndex> {
        let mut out = Vec::new();
        let mut cur = list.front();
        while let Some(idx) = cur {
            out.push(idx);
            cur = slab.get(idx).unwrap().next;
        }
        out
    }

    #[test]
    fn push_back_preserves_insertion_order() {
        let (mut slab, idxs) = slab_with(3);
        let mut list = BucketList::EMPTY;
        for &i in &idxs {
            list.push_back(&mut slab, i);
        }
        assert_eq!(collect(&list, &slab), idxs);
    }

    #[test]
    fn remove_head_middle_tail() {
        let (mut slab, idxs) = slab_with(4);
        let mut list = BucketList::EMPTY;
        for &i in &idxs {
            list.push_back(&mut slab, i);
        }

        list.remove(&mut slab, idxs[1]);
        assert_eq!(collect(&list, &slab), vec![idxs[0], idxs[2], idxs[3]]);

        list.remove(&mut slab, idxs[0]);
        assert_eq!(collect(&list, &slab), vec![idxs[2], idxs[3]]);

        list.remove(&mut slab, idxs[3]);
        assert_eq!(collect(&list, &slab), vec![idxs[2]]);

        list.remove(&mut slab, idxs[2]);
        assert!(list.front().is_none());
    }

    #[test]
    fn removed_entity_is_detached() {
        let (mut slab, idxs) = slab_with(2);
        let mut list = BucketList::EMPTY;
        list.push_back(&mut slab, idxs[0]);
        list.push_back(&mut slab, idxs[1]);
        list.remove(&mut slab, idxs[0]);
        let e = slab.get(idxs[0]).unwrap();
        assert!(e.prev.is_none() && e.next.is_none());
    }

    #[test]
    fn vacate_bumps_generation() {
        let (mut slab, idxs) = slab_with(1);
        assert_eq!(slab.generation(idxs[0]), Some(0));
        slab.vacate(idxs[0], None);
        assert_eq!(slab.generation(idxs[0]), None);
        slab.occupy(idxs[0], TimerEntry::blank());
        assert_eq!(slab.generation(idxs[0]), Some(1));
    }

    #[test]
    fn free_list_threads_through_slots() {
        let (mut slab, idxs) = slab_with(2);
        slab.vacate(idxs[0], None);
        slab.vacate(idxs[1], Some(idxs[0]));
        assert_eq!(slab.free_next(idxs[1]), Some(idxs[0]));
        assert_eq!(slab.free_next(idxs[0]), None);
    }
}
