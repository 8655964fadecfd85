//! Fixed-capacity instance slot store with tag lookup and slot reuse.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hash::Hash;
use std::ops::Range;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

use super::transform::{InstanceTransform, VisibilityRotation};
use crate::error::{PayloadError, SlotError};

/// Auxiliary data owned by a slot and released when the slot is reclaimed
/// (removal, generation sweep, clear, or drop of the store).
pub trait OwnedPayload {
    /// Release the payload. A failure is logged by the store; the slot is
    /// reclaimed regardless.
    fn dispose(self: Box<Self>) -> Result<(), PayloadError>;
}

/// Everything needed to place one instance into a slot.
pub struct NewInstance<K> {
    /// Lookup key. Untagged instances are reachable only by slot index.
    pub tag: Option<K>,
    /// Transform cells. The visibility cell is overwritten from `mode`.
    pub transform: InstanceTransform,
    /// Draw-time visibility / rotation mode.
    pub mode: VisibilityRotation,
    /// Optional payload the slot takes ownership of.
    pub payload: Option<Box<dyn OwnedPayload>>,
    /// Generation the slot is stamped with.
    pub generation: u32,
}

impl<K> NewInstance<K> {
    /// Static, untagged instance at generation 0.
    #[must_use]
    pub fn new(transform: impl Into<InstanceTransform>) -> Self {
        Self {
            tag: None,
            transform: transform.into(),
            mode: VisibilityRotation::Static,
            payload: None,
            generation: 0,
        }
    }

    /// Static instance bound to `tag` at generation 0.
    #[must_use]
    pub fn tagged(tag: K, transform: impl Into<InstanceTransform>) -> Self {
        Self {
            tag: Some(tag),
            ..Self::new(transform)
        }
    }

    /// Set the visibility / rotation mode.
    #[must_use]
    pub fn with_mode(mut self, mode: VisibilityRotation) -> Self {
        self.mode = mode;
        self
    }

    /// Hand a payload to the slot.
    #[must_use]
    pub fn with_payload(mut self, payload: Box<dyn OwnedPayload>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Stamp the slot with `generation`.
    #[must_use]
    pub fn at_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }
}

/// Per-slot bookkeeping. The transform lives in the parallel
/// `transforms` vector so it can be uploaded as one contiguous span.
pub(super) struct InstanceRecord<K> {
    pub(super) generation: u32,
    pub(super) tag: Option<K>,
    pub(super) payload: Option<Box<dyn OwnedPayload>>,
    pub(super) live: bool,
}

/// Dense array of instance slots.
///
/// Slots are appended up to a fixed capacity and never compacted.
/// Tombstoned slots keep their position and a culled visibility cell until
/// an add reuses them, lowest index first.
pub struct SlotStore<K> {
    capacity: u32,
    pub(super) records: Vec<InstanceRecord<K>>,
    pub(super) transforms: Vec<InstanceTransform>,
    deleted_count: u32,
    free: BinaryHeap<Reverse<u32>>,
    tags: FxHashMap<K, u32>,
    dirty: Option<Range<u32>>,
}

impl<K: Eq + Hash + Clone> SlotStore<K> {
    /// Empty store with room for `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: u32) -> Result<Self, SlotError> {
        if capacity == 0 {
            return Err(SlotError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            records: Vec::with_capacity(capacity as usize),
            transforms: Vec::with_capacity(capacity as usize),
            deleted_count: 0,
            free: BinaryHeap::new(),
            tags: FxHashMap::default(),
            dirty: None,
        })
    }

    /// Place an instance, reusing the lowest tombstoned slot if any.
    ///
    /// # Errors
    ///
    /// [`SlotError::DuplicateTag`] if the tag is bound to a live slot, and
    /// [`SlotError::CapacityExceeded`] if every slot is live. The store is
    /// left untouched in both cases.
    pub fn add(&mut self, instance: NewInstance<K>) -> Result<u32, SlotError> {
        if let Some(tag) = &instance.tag {
            if self.tags.contains_key(tag) {
                return Err(SlotError::DuplicateTag);
            }
        }

        let index = if let Some(Reverse(index)) = self.free.pop() {
            debug_assert!(self.deleted_count > 0, "free slot without tombstone");
            self.deleted_count -= 1;
            index
        } else if self.count() < self.capacity {
            self.records.push(InstanceRecord {
                generation: 0,
                tag: None,
                payload: None,
                live: false,
            });
            self.transforms.push(InstanceTransform::CULLED);
            self.count() - 1
        } else {
            return Err(SlotError::CapacityExceeded {
                capacity: self.capacity,
            });
        };

        let NewInstance {
            tag,
            mut transform,
            mode,
            payload,
            generation,
        } = instance;
        transform.set_visibility(mode);

        if let Some(tag) = &tag {
            let _ = self.tags.insert(tag.clone(), index);
        }
        let slot = index as usize;
        self.records[slot] = InstanceRecord {
            generation,
            tag,
            payload,
            live: true,
        };
        self.transforms[slot] = transform;
        self.mark_dirty(index);
        self.check_invariants();
        Ok(index)
    }

    /// Tombstone a slot: release its payload, cull it and unbind its tag.
    ///
    /// Returns `false` if `index` is out of range or already tombstoned.
    pub fn remove_at(&mut self, index: u32) -> bool {
        let Some(record) = self.records.get_mut(index as usize) else {
            return false;
        };
        if !record.live {
            return false;
        }
        record.live = false;
        let payload = record.payload.take();
        if let Some(tag) = record.tag.take() {
            let _ = self.tags.remove(&tag);
        }

        self.transforms[index as usize].set_visibility(VisibilityRotation::Culled);
        self.deleted_count += 1;
        self.free.push(Reverse(index));
        self.mark_dirty(index);
        self.check_invariants();

        if let Some(payload) = payload {
            dispose_payload(index, payload);
        }
        true
    }

    /// Tombstone the slot bound to `tag`. Returns `false` on a miss.
    pub fn remove(&mut self, tag: &K) -> bool {
        self.index_of(tag).is_some_and(|index| self.remove_at(index))
    }

    /// Whether `tag` is bound to a live slot.
    #[must_use]
    pub fn exist(&self, tag: &K) -> bool {
        self.tags.contains_key(tag)
    }

    /// Slot bound to `tag`.
    #[must_use]
    pub fn index_of(&self, tag: &K) -> Option<u32> {
        self.tags.get(tag).copied()
    }

    /// Rewrite only the visibility cell of a live slot.
    ///
    /// Returns `false` if `index` is out of range or tombstoned.
    pub fn set_visibility_rotation(
        &mut self,
        index: u32,
        mode: VisibilityRotation,
    ) -> bool {
        if !self.is_live(index) {
            return false;
        }
        self.transforms[index as usize].set_visibility(mode);
        self.mark_dirty(index);
        true
    }

    /// Matrix of the slot bound to `tag`, or the culled sentinel.
    #[must_use]
    pub fn matrix(&self, tag: &K) -> Mat4 {
        self.index_of(tag)
            .map_or(InstanceTransform::CULLED.to_mat4(), |index| {
                self.matrix_at(index)
            })
    }

    /// Matrix stored at `index` (culled for tombstones), or the culled
    /// sentinel when out of range.
    #[must_use]
    pub fn matrix_at(&self, index: u32) -> Mat4 {
        self.transform_at(index)
            .unwrap_or(&InstanceTransform::CULLED)
            .to_mat4()
    }

    /// World position of the slot bound to `tag`, or zero.
    #[must_use]
    pub fn world_position(&self, tag: &K) -> Vec3 {
        self.index_of(tag)
            .and_then(|index| self.transform_at(index))
            .map_or(Vec3::ZERO, InstanceTransform::position)
    }

    /// Raw record at `index`, tombstones included.
    #[must_use]
    pub fn transform_at(&self, index: u32) -> Option<&InstanceTransform> {
        self.transforms.get(index as usize)
    }

    /// Generation of a live slot.
    #[must_use]
    pub fn generation_at(&self, index: u32) -> Option<u32> {
        self.records
            .get(index as usize)
            .filter(|record| record.live)
            .map(|record| record.generation)
    }

    /// Tag of a live slot.
    #[must_use]
    pub fn tag_at(&self, index: u32) -> Option<&K> {
        self.records
            .get(index as usize)
            .filter(|record| record.live)
            .and_then(|record| record.tag.as_ref())
    }

    /// Whether `index` holds a live (non-tombstoned) instance.
    #[must_use]
    pub fn is_live(&self, index: u32) -> bool {
        self.records
            .get(index as usize)
            .is_some_and(|record| record.live)
    }

    /// Release every payload and forget every slot. The allocation is kept.
    pub fn clear(&mut self) {
        let released: Vec<_> = self
            .records
            .iter_mut()
            .enumerate()
            .filter_map(|(i, record)| {
                record.payload.take().map(|payload| (i as u32, payload))
            })
            .collect();
        for (index, payload) in released {
            dispose_payload(index, payload);
        }
        self.records.clear();
        self.transforms.clear();
        self.free.clear();
        self.tags.clear();
        self.deleted_count = 0;
        self.dirty = None;
    }

    /// Number of instances the renderer must draw: highest live slot + 1.
    /// Tombstones below that slot are drawn culled.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.records
            .iter()
            .rposition(|record| record.live)
            .map_or(0, |index| index as u32 + 1)
    }

    /// Number of live instances.
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.count() - self.deleted_count
    }

    /// Number of tombstoned slots awaiting reuse.
    #[must_use]
    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    /// Fixed slot capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whether an add would fail with [`SlotError::CapacityExceeded`].
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.live_count() >= self.capacity
    }

    /// Whether no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// All appended records in slot order, trailing tombstones included.
    #[must_use]
    pub fn transforms(&self) -> &[InstanceTransform] {
        &self.transforms
    }

    /// Slot span mutated since the last call, if any.
    pub fn take_dirty(&mut self) -> Option<Range<u32>> {
        self.dirty.take()
    }

    pub(super) fn count(&self) -> u32 {
        self.records.len() as u32
    }

    fn mark_dirty(&mut self, index: u32) {
        self.dirty = Some(match self.dirty.take() {
            Some(span) => span.start.min(index)..span.end.max(index + 1),
            None => index..index + 1,
        });
    }

    fn check_invariants(&self) {
        debug_assert!(self.deleted_count <= self.count());
        debug_assert_eq!(self.deleted_count as usize, self.free.len());
        debug_assert!(self.count() <= self.capacity);
    }
}

impl<K> Drop for SlotStore<K> {
    fn drop(&mut self) {
        for (i, record) in self.records.iter_mut().enumerate() {
            if let Some(payload) = record.payload.take() {
                dispose_payload(i as u32, payload);
            }
        }
    }
}

fn dispose_payload(index: u32, payload: Box<dyn OwnedPayload>) {
    if let Err(e) = payload.dispose() {
        log::warn!("slot {index}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    struct Counted {
        disposed: Rc<Cell<u32>>,
        fail: bool,
    }

    impl OwnedPayload for Counted {
        fn dispose(self: Box<Self>) -> Result<(), PayloadError> {
            self.disposed.set(self.disposed.get() + 1);
            if self.fail {
                Err(PayloadError("texture already gone".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn at(x: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            SlotStore::<&str>::new(0).err(),
            Some(SlotError::ZeroCapacity)
        );
    }

    #[test]
    fn appends_then_reuses_lowest_tombstone() {
        let mut store = SlotStore::new(8).unwrap();
        for (i, tag) in ["a", "b", "c", "d"].into_iter().enumerate() {
            let index = store.add(NewInstance::tagged(tag, at(i as f32))).unwrap();
            assert_eq!(index, i as u32);
        }
        assert!(store.remove(&"c"));
        assert!(store.remove(&"a"));
        assert_eq!(store.deleted_count(), 2);

        assert_eq!(store.add(NewInstance::tagged("e", at(9.0))).unwrap(), 0);
        assert_eq!(store.add(NewInstance::tagged("f", at(9.0))).unwrap(), 2);
        assert_eq!(store.add(NewInstance::tagged("g", at(9.0))).unwrap(), 4);
        assert_eq!(store.deleted_count(), 0);
        assert_eq!(store.instance_count(), 5);
    }

    #[test]
    fn full_store_rejects_append() {
        let mut store = SlotStore::new(2).unwrap();
        let _ = store.add(NewInstance::tagged(1, at(0.0))).unwrap();
        let _ = store.add(NewInstance::tagged(2, at(0.0))).unwrap();
        assert!(store.is_full());
        assert_eq!(
            store.add(NewInstance::tagged(3, at(0.0))),
            Err(SlotError::CapacityExceeded { capacity: 2 })
        );
        assert!(!store.exist(&3));

        assert!(store.remove_at(1));
        assert!(!store.is_full());
        assert_eq!(store.add(NewInstance::tagged(3, at(0.0))), Ok(1));
    }

    #[test]
    fn duplicate_tag_fails_without_side_effects() {
        let mut store = SlotStore::new(4).unwrap();
        let _ = store.add(NewInstance::tagged("x", at(1.0))).unwrap();
        assert!(store.dirty.is_some());
        let _ = store.take_dirty();

        assert_eq!(
            store.add(NewInstance::tagged("x", at(2.0))),
            Err(SlotError::DuplicateTag)
        );
        assert_eq!(store.instance_count(), 1);
        assert_eq!(store.take_dirty(), None);
        assert_eq!(store.world_position(&"x"), Vec3::X);
    }

    #[test]
    fn untagged_instances_do_not_collide() {
        let mut store = SlotStore::<u32>::new(4).unwrap();
        assert_eq!(store.add(NewInstance::new(at(0.0))), Ok(0));
        assert_eq!(store.add(NewInstance::new(at(0.0))), Ok(1));
        assert_eq!(store.tag_at(0), None);
        assert!(store.is_live(1));
    }

    #[test]
    fn matrix_round_trips_except_visibility_cell() {
        let mut store = SlotStore::new(4).unwrap();
        let mut cells: [f32; 16] = std::array::from_fn(|i| i as f32 * 1.5 - 3.0);
        cells[3] = f32::from_bits(0x7f7f_0001);
        let matrix = Mat4::from_cols_array(&cells);
        let _ = store
            .add(NewInstance::tagged("X", matrix).with_mode(VisibilityRotation::FaceAzimuth))
            .unwrap();

        let back = store.matrix(&"X").to_cols_array();
        for i in 0..16 {
            if i == 15 {
                assert_eq!(back[i], 1.0);
            } else {
                assert_eq!(back[i].to_bits(), cells[i].to_bits(), "cell {i}");
            }
        }
    }

    #[test]
    fn removed_slot_reads_back_culled() {
        let mut store = SlotStore::new(4).unwrap();
        let index = store.add(NewInstance::tagged("a", at(5.0))).unwrap();
        assert!(store.remove(&"a"));

        assert!(store.matrix_at(index).w_axis.w < 0.0);
        assert_eq!(store.matrix(&"a"), InstanceTransform::CULLED.to_mat4());
        assert_eq!(store.world_position(&"a"), Vec3::ZERO);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.instance_count(), 0);
        assert_eq!(store.transforms().len(), 1);
        assert!(!store.exist(&"a"));
    }

    #[test]
    fn instance_count_tracks_highest_live_slot() {
        let mut store = SlotStore::new(4).unwrap();
        for tag in ["a", "b", "c"] {
            let _ = store.add(NewInstance::tagged(tag, at(0.0))).unwrap();
        }
        assert!(store.remove(&"b"));
        assert_eq!(store.instance_count(), 3);
        assert!(store.remove(&"c"));
        assert_eq!(store.instance_count(), 1);
        assert_eq!(store.add(NewInstance::tagged("d", at(0.0))), Ok(1));
        assert_eq!(store.instance_count(), 2);
    }

    #[test]
    fn misses_are_soft() {
        let mut store = SlotStore::<&str>::new(4).unwrap();
        assert!(!store.remove(&"nope"));
        assert!(!store.remove_at(3));
        assert!(!store.set_visibility_rotation(0, VisibilityRotation::Static));
        assert_eq!(store.matrix_at(99), InstanceTransform::CULLED.to_mat4());

        let _ = store.add(NewInstance::tagged("a", at(0.0))).unwrap();
        assert!(store.remove_at(0));
        assert!(!store.remove_at(0));
        assert!(!store.set_visibility_rotation(0, VisibilityRotation::Static));
    }

    #[test]
    fn set_visibility_rotation_rewrites_one_cell() {
        let mut store = SlotStore::new(4).unwrap();
        let index = store.add(NewInstance::tagged("a", at(2.0))).unwrap();
        let before = *store.transform_at(index).unwrap();

        assert!(store.set_visibility_rotation(index, VisibilityRotation::Culled));
        let after = *store.transform_at(index).unwrap();
        assert!(after.is_culled());
        assert_eq!(before.cells[..15], after.cells[..15]);
        // Explicitly culled slots stay live and addressable.
        assert!(store.exist(&"a"));
    }

    #[test]
    fn dirty_span_covers_mutations() {
        let mut store = SlotStore::new(8).unwrap();
        let _ = store.add(NewInstance::tagged(1, at(0.0))).unwrap();
        let _ = store.add(NewInstance::tagged(2, at(0.0))).unwrap();
        let _ = store.add(NewInstance::tagged(3, at(0.0))).unwrap();
        assert_eq!(store.take_dirty(), Some(0..3));
        assert_eq!(store.take_dirty(), None);

        assert!(store.remove(&2));
        assert!(store.set_visibility_rotation(2, VisibilityRotation::FaceAzimuth));
        assert_eq!(store.take_dirty(), Some(1..3));
    }

    #[test]
    fn clear_is_idempotent_and_keeps_capacity() {
        let disposed = Rc::new(Cell::new(0));
        let mut store = SlotStore::new(4).unwrap();
        for tag in ["a", "b"] {
            let payload = Box::new(Counted {
                disposed: Rc::clone(&disposed),
                fail: false,
            });
            let _ = store
                .add(NewInstance::tagged(tag, at(0.0)).with_payload(payload))
                .unwrap();
        }

        store.clear();
        assert_eq!(disposed.get(), 2);
        assert_eq!(store.instance_count(), 0);
        assert!(!store.exist(&"a"));
        assert!(!store.exist(&"b"));
        assert_eq!(store.capacity(), 4);

        store.clear();
        assert_eq!(disposed.get(), 2);
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.add(NewInstance::tagged("a", at(0.0))), Ok(0));
    }

    #[test]
    fn failing_payload_still_tombstones() {
        let disposed = Rc::new(Cell::new(0));
        let mut store = SlotStore::new(2).unwrap();
        let payload = Box::new(Counted {
            disposed: Rc::clone(&disposed),
            fail: true,
        });
        let _ = store
            .add(NewInstance::tagged("a", at(0.0)).with_payload(payload))
            .unwrap();

        assert!(store.remove(&"a"));
        assert_eq!(disposed.get(), 1);
        assert_eq!(store.deleted_count(), 1);
        assert!(store.transform_at(0).unwrap().is_culled());
    }

    #[test]
    fn drop_releases_remaining_payloads() {
        let disposed = Rc::new(Cell::new(0));
        {
            let mut store = SlotStore::new(2).unwrap();
            let payload = Box::new(Counted {
                disposed: Rc::clone(&disposed),
                fail: false,
            });
            let _ = store
                .add(NewInstance::tagged(7, at(0.0)).with_payload(payload))
                .unwrap();
        }
        assert_eq!(disposed.get(), 1);
    }

    #[test]
    fn random_churn_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5107);
        let mut store = SlotStore::new(32).unwrap();
        let mut live: Vec<u32> = Vec::new();

        for step in 0..2000u32 {
            if live.is_empty() || (rng.random_bool(0.55) && !store.is_full()) {
                let tag = step;
                let appended = store.transforms().len() as u32;
                let lowest_free = (0..appended).find(|i| !store.is_live(*i));
                let index = store.add(NewInstance::tagged(tag, at(step as f32))).unwrap();
                if let Some(expected) = lowest_free {
                    assert_eq!(index, expected);
                }
                live.push(tag);
            } else {
                let tag = live.swap_remove(rng.random_range(0..live.len()));
                assert!(store.remove(&tag));
                assert!(!store.exist(&tag));
            }

            assert_eq!(store.live_count() as usize, live.len());
            assert!(store.live_count() <= store.instance_count());
            assert!(store.instance_count() <= store.capacity());
            for i in 0..store.transforms().len() as u32 {
                let culled = store.transform_at(i).unwrap().is_culled();
                assert_eq!(culled, !store.is_live(i));
            }
        }
    }
}
