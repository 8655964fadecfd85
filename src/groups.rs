//! Group overflow: growing instance capacity by whole parallel groups.
//!
//! A single GPU-resident instance array is bounded by a device limit
//! (texture array depth, storage binding size). Instead of reallocating and
//! copying, which would invalidate slot indices in flight, capacity grows by
//! adding another group: its own slot store, transform buffer and resource
//! table, drawn with its own draw call. Groups are never freed while the
//! manager lives.

use std::hash::Hash;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashSet;

use crate::backend::GroupBackend;
use crate::binder::{bind_resource, unbind_resource, ResourceTable};
use crate::error::{InstancerError, SlotError};
use crate::slots::{
    InstanceTransform, NewInstance, SlotStore, SweepReport, VisibilityRotation,
};

/// Notification emitted once per new group, so dependent renderer state
/// (e.g. one draw command per group) can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCreated {
    /// Index of the new group.
    pub group: usize,
    /// Slot capacity of the new group.
    pub capacity: u32,
}

/// Where an added instance landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAddress {
    /// Group index.
    pub group: usize,
    /// Slot index within the group.
    pub slot: u32,
    /// The group's instance count after the add.
    pub group_instance_count: u32,
}

/// Read-only view of one group for the draw loop.
pub struct GroupView<'a, S> {
    /// Group index.
    pub index: usize,
    /// Instances to draw (highest appended slot + 1).
    pub instance_count: u32,
    /// Live instances in the group.
    pub live_count: u32,
    /// Backend storage to bind for the draw.
    pub storage: &'a S,
}

struct Group<K, B: GroupBackend> {
    store: SlotStore<K>,
    storage: B::Storage,
    resources: ResourceTable<B::Handle>,
}

type GroupListener = Box<dyn FnMut(GroupCreated)>;

/// A growable set of fixed-capacity instance groups over one backend.
pub struct GroupedSlots<K, B: GroupBackend> {
    backend: B,
    groups: Vec<Group<K, B>>,
    max_per_group: u32,
    on_group_created: Option<GroupListener>,
}

impl<K: Eq + Hash + Clone, B: GroupBackend> GroupedSlots<K, B> {
    /// Manager with no groups yet. Each group holds
    /// `min(backend limit, requested_max)` instances.
    ///
    /// # Errors
    ///
    /// [`SlotError::ZeroCapacity`] if that minimum is zero.
    pub fn new(backend: B, requested_max: u32) -> Result<Self, InstancerError> {
        let max_per_group = backend.max_instances_per_group().min(requested_max);
        if max_per_group == 0 {
            return Err(SlotError::ZeroCapacity.into());
        }
        if max_per_group < requested_max {
            log::debug!(
                "instance groups clamped to {max_per_group} (requested {requested_max})"
            );
        }
        Ok(Self {
            backend,
            groups: Vec::new(),
            max_per_group,
            on_group_created: None,
        })
    }

    /// Register the callback invoked once per newly created group.
    pub fn on_group_created(&mut self, listener: impl FnMut(GroupCreated) + 'static) {
        self.on_group_created = Some(Box::new(listener));
    }

    /// Add an instance to the first group with room, creating a group when
    /// all are full, then bind `resource` at the returned slot.
    ///
    /// # Errors
    ///
    /// [`SlotError::DuplicateTag`] if the tag is live in any group, backend
    /// errors from group creation, and upload errors from the resource
    /// binder. A failed upload rolls the slot back.
    pub fn add(
        &mut self,
        instance: NewInstance<K>,
        resource: Option<B::Resource>,
    ) -> Result<SlotAddress, InstancerError> {
        if instance.tag.as_ref().is_some_and(|tag| self.exist(tag)) {
            return Err(SlotError::DuplicateTag.into());
        }

        let index = match self.groups.iter().position(|g| !g.store.is_full()) {
            Some(index) => index,
            None => self.create_group()?,
        };
        let group = &mut self.groups[index];
        let slot = group.store.add(instance)?;

        if let Some(resource) = resource {
            if let Err(e) = bind_resource(
                &mut self.backend,
                &mut group.storage,
                &mut group.resources,
                slot,
                resource,
            ) {
                let _ = group.store.remove_at(slot);
                return Err(e.into());
            }
        }

        Ok(SlotAddress {
            group: index,
            slot,
            group_instance_count: group.store.instance_count(),
        })
    }

    /// Tombstone the slot bound to `tag` and release its resource.
    pub fn remove(&mut self, tag: &K) -> bool {
        self.find(tag)
            .is_some_and(|(group, slot)| self.remove_at(group, slot))
    }

    /// Tombstone `slot` of `group` and release its resource.
    pub fn remove_at(&mut self, group: usize, slot: u32) -> bool {
        let Some(g) = self.groups.get_mut(group) else {
            return false;
        };
        if !g.store.remove_at(slot) {
            return false;
        }
        unbind_resource(&mut self.backend, &mut g.storage, &mut g.resources, slot);
        true
    }

    /// Whether `tag` is live in any group.
    #[must_use]
    pub fn exist(&self, tag: &K) -> bool {
        self.groups.iter().any(|g| g.store.exist(tag))
    }

    /// Group and slot bound to `tag`.
    #[must_use]
    pub fn find(&self, tag: &K) -> Option<(usize, u32)> {
        self.groups
            .iter()
            .enumerate()
            .find_map(|(i, g)| g.store.index_of(tag).map(|slot| (i, slot)))
    }

    /// Rewrite the visibility cell of the slot bound to `tag`.
    pub fn set_visibility_rotation(
        &mut self,
        tag: &K,
        mode: VisibilityRotation,
    ) -> bool {
        self.find(tag).is_some_and(|(group, slot)| {
            self.groups[group].store.set_visibility_rotation(slot, mode)
        })
    }

    /// Matrix bound to `tag`, or the culled sentinel.
    #[must_use]
    pub fn matrix(&self, tag: &K) -> Mat4 {
        self.find(tag)
            .map_or(InstanceTransform::CULLED.to_mat4(), |(group, slot)| {
                self.groups[group].store.matrix_at(slot)
            })
    }

    /// World position bound to `tag`, or zero.
    #[must_use]
    pub fn world_position(&self, tag: &K) -> Vec3 {
        self.groups
            .iter()
            .find(|g| g.store.exist(tag))
            .map_or(Vec3::ZERO, |g| g.store.world_position(tag))
    }

    /// Resident handle recorded for the slot bound to `tag`.
    #[must_use]
    pub fn resource(&self, tag: &K) -> Option<&B::Handle> {
        let (group, slot) = self.find(tag)?;
        self.groups[group].resources.get(slot)
    }

    /// Sweep every group; see [`SlotStore::remove_generation`]. Resources
    /// of evicted slots are released.
    pub fn remove_generation(
        &mut self,
        remove_below: u32,
        current: u32,
        keep: &FxHashSet<K>,
    ) -> SweepReport {
        let backend = &mut self.backend;
        let report = self.groups.iter_mut().fold(
            SweepReport::default(),
            |report, g| {
                let mut evicted = Vec::new();
                let swept = g.store.remove_generation_with(
                    remove_below,
                    current,
                    keep,
                    |slot| evicted.push(slot),
                );
                for slot in evicted {
                    unbind_resource(backend, &mut g.storage, &mut g.resources, slot);
                }
                report.merge(swept)
            },
        );
        if report.evicted > 0 {
            log::debug!(
                "swept generation < {remove_below}: {} evicted, {} kept",
                report.evicted,
                report.refreshed
            );
        }
        report
    }

    /// Sweep everything older than `max_age` generations at `current`.
    pub fn increase_remove_generation(
        &mut self,
        current: u32,
        max_age: u32,
        keep: &FxHashSet<K>,
    ) -> SweepReport {
        self.remove_generation(current.saturating_sub(max_age), current, keep)
    }

    /// Empty every group and release every resource. Groups and their GPU
    /// allocations are kept.
    pub fn clear(&mut self) {
        for g in &mut self.groups {
            g.store.clear();
            for (slot, handle) in g.resources.drain() {
                self.backend.release(&mut g.storage, slot, handle);
            }
        }
    }

    /// Flush mutated transforms and bind every group. Call once per frame,
    /// after this frame's mutations and before its draws.
    pub fn prepare(&mut self) {
        for g in &mut self.groups {
            if let Some(span) = g.store.take_dirty() {
                let transforms =
                    &g.store.transforms()[span.start as usize..span.end as usize];
                log::trace!("flushing slots {span:?}");
                self.backend
                    .write_transforms(&mut g.storage, span.start, transforms);
            }
            let table_dirty = g.resources.take_dirty();
            self.backend.bind(&mut g.storage, &g.resources, table_dirty);
        }
    }

    /// Every group, in creation order, for the draw loop.
    pub fn groups(&self) -> impl Iterator<Item = GroupView<'_, B::Storage>> {
        self.groups.iter().enumerate().map(|(index, g)| GroupView {
            index,
            instance_count: g.store.instance_count(),
            live_count: g.store.live_count(),
            storage: &g.storage,
        })
    }

    /// Slot store of `group`.
    #[must_use]
    pub fn store(&self, group: usize) -> Option<&SlotStore<K>> {
        self.groups.get(group).map(|g| &g.store)
    }

    /// Number of groups created so far.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Slot capacity of every group.
    #[must_use]
    pub fn max_per_group(&self) -> u32 {
        self.max_per_group
    }

    /// `max_per_group * group_count`.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.max_per_group as usize * self.groups.len()
    }

    /// Live instances across all groups.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.store.live_count() as usize)
            .sum()
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn create_group(&mut self) -> Result<usize, InstancerError> {
        let index = self.groups.len();
        let capacity = self.max_per_group;
        let storage = self.backend.create_group(index, capacity)?;
        self.groups.push(Group {
            store: SlotStore::new(capacity)?,
            storage,
            resources: ResourceTable::new(capacity),
        });
        log::debug!("created instance group {index} ({capacity} slots)");
        if let Some(listener) = &mut self.on_group_created {
            listener(GroupCreated {
                group: index,
                capacity,
            });
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryResource};
    use crate::error::BackendError;

    fn manager(max: u32) -> GroupedSlots<&'static str, MemoryBackend> {
        GroupedSlots::new(MemoryBackend::new(1024), max).unwrap()
    }

    fn at(x: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    fn add(
        slots: &mut GroupedSlots<&'static str, MemoryBackend>,
        tag: &'static str,
        handle: u64,
    ) -> SlotAddress {
        slots
            .add(
                NewInstance::tagged(tag, at(handle as f32)),
                Some(MemoryResource::Handle(handle)),
            )
            .unwrap()
    }

    #[test]
    fn per_group_capacity_is_clamped_by_backend() {
        let slots = GroupedSlots::<u32, _>::new(MemoryBackend::new(16), 100).unwrap();
        assert_eq!(slots.max_per_group(), 16);
        let slots = GroupedSlots::<u32, _>::new(MemoryBackend::new(16), 4).unwrap();
        assert_eq!(slots.max_per_group(), 4);
        assert!(matches!(
            GroupedSlots::<u32, _>::new(MemoryBackend::new(0), 4),
            Err(InstancerError::Slot(SlotError::ZeroCapacity))
        ));
    }

    #[test]
    fn overflow_creates_exactly_one_more_group() {
        let mut slots = manager(3);
        for (i, tag) in ["a", "b", "c"].into_iter().enumerate() {
            let address = add(&mut slots, tag, i as u64);
            assert_eq!(address.group, 0);
        }
        let address = add(&mut slots, "d", 3);
        assert_eq!(address.group, 1);
        assert_eq!(address.slot, 0);
        assert_eq!(address.group_instance_count, 1);
        assert_eq!(slots.group_count(), 2);
        assert_eq!(slots.total_capacity(), 6);
    }

    #[test]
    fn scenario_two_per_group() {
        let mut slots = manager(2);
        assert_eq!(add(&mut slots, "a", 1).slot, 0);
        assert_eq!(add(&mut slots, "b", 2).slot, 1);
        let c = add(&mut slots, "c", 3);
        assert_eq!((c.group, c.slot), (1, 0));

        assert!(slots.remove(&"a"));
        let first = slots.store(0).unwrap();
        assert_eq!(first.instance_count(), 2);
        assert!(first.transform_at(0).unwrap().is_culled());
        assert_eq!(slots.resource(&"a"), None);

        let d = add(&mut slots, "d", 4);
        assert_eq!((d.group, d.slot), (0, 0));
        assert_eq!(slots.group_count(), 2);
        assert_eq!(slots.resource(&"d"), Some(&4));
    }

    #[test]
    fn group_created_listener_fires_once_per_group() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut slots = manager(1);
        let sink = Rc::clone(&seen);
        slots.on_group_created(move |event| sink.borrow_mut().push(event));

        let _ = add(&mut slots, "a", 1);
        let _ = add(&mut slots, "b", 2);
        assert!(slots.remove(&"a"));
        let _ = add(&mut slots, "c", 3);

        assert_eq!(
            *seen.borrow(),
            vec![
                GroupCreated {
                    group: 0,
                    capacity: 1
                },
                GroupCreated {
                    group: 1,
                    capacity: 1
                },
            ]
        );
    }

    #[test]
    fn duplicate_tags_are_rejected_across_groups() {
        let mut slots = manager(1);
        let _ = add(&mut slots, "a", 1);
        let _ = add(&mut slots, "b", 2);
        let result = slots.add(NewInstance::tagged("a", at(0.0)), None);
        assert!(matches!(result, Err(InstancerError::Slot(SlotError::DuplicateTag))));
        assert_eq!(slots.group_count(), 2);
        assert_eq!(slots.live_count(), 2);
    }

    #[test]
    fn failed_upload_rolls_back_the_slot() {
        let mut slots = manager(4);
        let bad = MemoryResource::Pixels {
            width: 4,
            height: 4,
            rgba: vec![0; 3],
        };
        let result = slots.add(NewInstance::tagged("x", at(0.0)), Some(bad));
        assert!(matches!(
            result,
            Err(InstancerError::Backend(BackendError::ResourceMismatch(_)))
        ));
        assert!(!slots.exist(&"x"));
        assert_eq!(slots.live_count(), 0);
        // The rolled-back slot is the next one handed out.
        assert_eq!(add(&mut slots, "y", 1).slot, 0);
    }

    #[test]
    fn backend_group_limit_surfaces() {
        let backend = MemoryBackend::new(1).with_group_limit(1);
        let mut slots = GroupedSlots::<&str, _>::new(backend, 1).unwrap();
        assert!(slots.add(NewInstance::tagged("a", at(0.0)), None).is_ok());
        let result = slots.add(NewInstance::tagged("b", at(0.0)), None);
        assert!(matches!(
            result,
            Err(InstancerError::Backend(BackendError::GroupLimit { limit: 1 }))
        ));
    }

    #[test]
    fn lookups_fan_out_and_miss_softly() {
        let mut slots = manager(1);
        let _ = add(&mut slots, "a", 1);
        let _ = add(&mut slots, "b", 2);
        assert_eq!(slots.find(&"b"), Some((1, 0)));
        assert_eq!(slots.world_position(&"b"), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(slots.matrix(&"b").w_axis.x, 2.0);
        assert!(slots.set_visibility_rotation(&"b", VisibilityRotation::FaceAzimuthElevation));
        assert_eq!(slots.matrix(&"b").w_axis.w, 2.0);

        assert_eq!(slots.find(&"zz"), None);
        assert_eq!(slots.world_position(&"zz"), Vec3::ZERO);
        assert_eq!(slots.matrix(&"zz"), InstanceTransform::CULLED.to_mat4());
        assert!(!slots.set_visibility_rotation(&"zz", VisibilityRotation::Static));
        assert!(!slots.remove(&"zz"));
        assert!(!slots.remove_at(7, 0));
    }

    #[test]
    fn sweep_fans_out_and_releases_resources() {
        let mut slots = manager(2);
        for (tag, generation) in [("a", 1), ("b", 5), ("c", 1), ("keep", 1)] {
            let _ = slots
                .add(
                    NewInstance::tagged(tag, at(0.0)).at_generation(generation),
                    Some(MemoryResource::Handle(generation as u64 * 10)),
                )
                .unwrap();
        }
        let keep: FxHashSet<_> = ["keep"].into_iter().collect();
        let report = slots.remove_generation(3, 6, &keep);

        assert_eq!(report.evicted, 2);
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.staleness, Some(5));
        assert!(slots.exist(&"b"));
        assert!(slots.exist(&"keep"));
        assert!(!slots.exist(&"a"));
        assert!(!slots.exist(&"c"));
        assert_eq!(slots.backend().released(), &[10, 10]);
        assert_eq!(slots.resource(&"b"), Some(&50));
    }

    #[test]
    fn increase_remove_generation_uses_max_age() {
        let mut slots = manager(4);
        let _ = slots.add(NewInstance::tagged("old", at(0.0)).at_generation(7), None).unwrap();
        let _ = slots.add(NewInstance::tagged("new", at(0.0)).at_generation(8), None).unwrap();
        let report = slots.increase_remove_generation(10, 2, &FxHashSet::default());
        assert_eq!(report.evicted, 1);
        assert!(slots.exist(&"new"));

        // Saturates rather than wrapping at the start of time.
        let report = slots.increase_remove_generation(1, 5, &FxHashSet::default());
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn prepare_flushes_dirty_spans_and_refreshes_tables() {
        let mut slots = manager(4);
        let _ = add(&mut slots, "a", 1);
        let _ = add(&mut slots, "b", 2);
        slots.prepare();

        let view = slots.groups().next().unwrap();
        assert_eq!(view.instance_count, 2);
        assert_eq!(view.storage.transforms()[1].position(), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(view.storage.bound_handles()[..2], [Some(1), Some(2)]);
        assert_eq!(view.storage.refreshes(), 1);

        assert!(slots.remove(&"a"));
        slots.prepare();
        let view = slots.groups().next().unwrap();
        assert!(view.storage.transforms()[0].is_culled());
        assert_eq!(view.storage.bound_handles()[0], None);
        assert_eq!(view.live_count, 1);
        assert_eq!(view.storage.refreshes(), 2);

        slots.prepare();
        let view = slots.groups().next().unwrap();
        assert_eq!(view.storage.binds(), 3);
        assert_eq!(view.storage.refreshes(), 2);
    }

    #[test]
    fn clear_keeps_groups_and_releases_everything() {
        let mut slots = manager(1);
        let _ = add(&mut slots, "a", 1);
        let _ = add(&mut slots, "b", 2);
        slots.clear();
        assert_eq!(slots.group_count(), 2);
        assert_eq!(slots.live_count(), 0);
        assert!(!slots.exist(&"a"));
        assert_eq!(slots.backend().released(), &[1, 2]);

        slots.clear();
        assert_eq!(slots.backend().released(), &[1, 2]);
        assert_eq!(slots.total_capacity(), 2);

        let address = add(&mut slots, "c", 3);
        assert_eq!((address.group, address.slot), (0, 0));
    }
}
