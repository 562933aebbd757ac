use crate::track::{Slot, TrackId, TrackState};
use nalgebra::Point2;

/// Object pool of track slots.
///
/// Slots are acquired when tracks are spawned and released when tracks are dropped. A
/// released slot keeps the allocation of its strategy description (templates, descriptor
/// buffers) so the next spawn doesn't allocate, but every record field is cleared and the
/// caller payload is discarded.
///
/// The pool also issues track ids; ids grow monotonically and are never handed out twice
/// until [reset_ids](TrackPool::reset_ids) is called.
///
#[derive(Debug)]
pub(crate) struct TrackPool<D, P> {
    free: Vec<Slot<D, P>>,
    next_id: TrackId,
}

impl<D, P> Default for TrackPool<D, P> {
    fn default() -> Self {
        Self {
            free: Vec::default(),
            next_id: 0,
        }
    }
}

impl<D: Default, P> TrackPool<D, P> {
    /// Takes a slot from the free list (or creates a new one) and initializes it as an
    /// active track with a fresh id.
    ///
    pub fn acquire(&mut self, location: Point2<f32>, frame_id: i64, set_id: usize) -> Slot<D, P> {
        let mut slot = self.free.pop().unwrap_or_default();
        self.activate(&mut slot, location, frame_id, set_id);
        slot
    }

    /// Initializes the description of a free slot with `init` and, if it succeeds, turns
    /// the slot into a track. A failed initialization returns the slot to the free list
    /// without consuming an id.
    ///
    pub fn acquire_with<F>(
        &mut self,
        location: Point2<f32>,
        frame_id: i64,
        set_id: usize,
        init: F,
    ) -> Option<Slot<D, P>>
    where
        F: FnOnce(&mut D) -> bool,
    {
        let mut slot = self.free.pop().unwrap_or_default();
        if !init(&mut slot.description) {
            self.free.push(slot);
            return None;
        }
        self.activate(&mut slot, location, frame_id, set_id);
        Some(slot)
    }

    fn activate(&mut self, slot: &mut Slot<D, P>, location: Point2<f32>, frame_id: i64, set_id: usize) {
        let r = &mut slot.record;
        r.id = self.next_id;
        r.location = location;
        r.spawn_frame_id = frame_id;
        r.last_seen_frame_id = frame_id;
        r.set_id = set_id;
        r.state = TrackState::Active;
        r.payload = None;
        self.next_id += 1;
    }
}

impl<D, P> TrackPool<D, P> {
    /// Returns the slot to the free list
    ///
    pub fn release(&mut self, mut slot: Slot<D, P>) {
        slot.record.clear();
        self.free.push(slot);
    }

    pub fn release_all<I>(&mut self, slots: I)
    where
        I: IntoIterator<Item = Slot<D, P>>,
    {
        for s in slots {
            self.release(s);
        }
    }

    /// Id the next acquired slot receives
    ///
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Restarts id generation, allowed only when no track is reachable anymore
    ///
    pub fn reset_ids(&mut self) {
        self.next_id = 0;
    }
}

/// Removes items at `indices` (any order, no duplicates) preserving the order of the
/// remaining ones. Removal goes in strictly descending index order so earlier removals
/// never shift the indices that are still to be removed.
///
/// Returns removed items in ascending index order.
///
pub(crate) fn remove_indices<T>(items: &mut Vec<T>, indices: &mut [usize]) -> Vec<T> {
    indices.sort_unstable_by(|a, b| b.cmp(a));
    let mut removed = Vec::with_capacity(indices.len());
    for i in indices.iter() {
        removed.push(items.remove(*i));
    }
    removed.reverse();
    removed
}
