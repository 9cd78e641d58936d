//! Entity recycling across the Stopped <-> reused lifecycle.
//!
//! The pool decides which slab slot backs the next registration and keeps
//! the freshly-allocated count; the wheel enforces the reuse-safety
//! contract around it (an entity handed out must be pristine, an entity
//! put back must be detached — violations abort, see the wheel module).

use crate::entry::TimerEntry;
use crate::slab::{EntryIndex, TimerSlab};

/// Recycling policy over a wheel's [`TimerSlab`].
///
/// Implementations are driven under the owning wheel's lock, so they need
/// no internal synchronization. Safety of reuse holds across the aggregate
/// pool of distinct entities; nothing protects two live handles to the
/// *same* entity instance beyond the slab's generation check.
pub trait TimerPool: Send {
    /// Produces an occupied slot holding a pristine entity, either by
    /// recycling a previously [`put`](Self::put) slot or by growing the
    /// slab.
    fn get(&mut self, slab: &mut TimerSlab) -> EntryIndex;

    /// Takes back a slot whose entity is detached; the entity is destroyed
    /// (dropping its captures) and the slot becomes available for reuse.
    fn put(&mut self, slab: &mut TimerSlab, idx: EntryIndex);

    /// Number of entities created fresh rather than recycled.
    fn fresh_count(&self) -> u64;
}

/// Default pool: LIFO free list threaded through vacated slab slots.
pub struct FreeListPool {
    free_head: Option<EntryIndex>,
    fresh: u64,
}

impl FreeListPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            free_head: None,
            fresh: 0,
        }
    }
}

impl Default for FreeListPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPool for FreeListPool {
    fn get(&mut self, slab: &mut TimerSlab) -> EntryIndex {
        match self.free_head {
            Some(idx) => {
                self.free_head = slab.free_next(idx);
                slab.occupy(idx, TimerEntry::blank());
                idx
            }
            None => {
                self.fresh += 1;
                slab.alloc_fresh(TimerEntry::blank())
            }
        }
    }

    fn put(&mut self, slab: &mut TimerSlab, idx: EntryIndex) {
        // Drops the evicted entity (and its captured arguments) here.
        let _ = slab.vacate(idx, self.free_head);
        self.free_head = Some(idx);
    }

    fn fresh_count(&self) -> u64 {
        self.fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocations_are_counted() {
        let mut slab = TimerSlab::new();
        let mut pool = FreeListPool::new();
        let a = pool.get(&mut slab);
        let b = pool.get(&mut slab);
        assert_ne!(a, b);
        assert_eq!(pool.fresh_count(), 2);
    }

    #[test]
    fn recycled_slot_does_not_count_as_fresh() {
        let mut slab = TimerSlab::new();
        let mut pool = FreeListPool::new();
        let a = pool.get(&mut slab);
        pool.put(&mut slab, a);
        let b = pool.get(&mut slab);
        assert_eq!(a, b);
        assert_eq!(pool.fresh_count(), 1);
    }

    #[test]
    fn recycling_bumps_generation() {
        let mut slab = TimerSlab::new();
        let mut pool = FreeListPool::new();
        let a = pool.get(&mut slab);
        let g0 = slab.generation(a).unwrap();
        pool.put(&mut slab, a);
        let b = pool.get(&mut slab);
        assert_eq!(a, b);
        assert_ne!(slab.generation(b).unwrap(), g0);
    }

    #[test]
    fn lifo_reuse_order() {
        let mut slab = TimerSlab::new();
        let mut pool = FreeListPool::new();
        let a = pool.get(&mut slab);
        let b = pool.get(&mut slab);
        pool.put(&mut slab, a);
        pool.put(&mut slab, b);
        assert_eq!(pool.get(&mut slab), b);
        assert_eq!(pool.get(&mut slab), a);
        assert_eq!(pool.fresh_count(), 2);
    }
}
