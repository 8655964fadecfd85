//! Tagged, textured quads with a caller-advanced generation clock.
//!
//! [`BitmapSet`] is the front end a label or marker renderer talks to: it
//! turns [`BitmapPlacement`]s into instance transforms, stamps them with
//! the current generation, and routes them through a [`GroupedSlots`].
//! Ephemeral overlays that are recreated every refresh are pruned with
//! [`BitmapSet::increase_remove_generation`] without tracking individual
//! lifetimes.

use std::hash::Hash;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashSet;

use crate::backend::GroupBackend;
use crate::error::InstancerError;
use crate::gpu::backend::WgpuBackend;
use crate::gpu::context::GpuContext;
use crate::groups::{GroupCreated, GroupView, GroupedSlots, SlotAddress};
use crate::options::Options;
use crate::slots::{
    BitmapPlacement, NewInstance, OwnedPayload, SweepReport, VisibilityRotation,
};

/// A set of tagged bitmaps over one backend.
pub struct BitmapSet<K, B: GroupBackend> {
    slots: GroupedSlots<K, B>,
    generation: u32,
    options: Options,
}

impl<K: Eq + Hash + Clone> BitmapSet<K, WgpuBackend> {
    /// Bitmap set on the GPU described by `context`.
    ///
    /// # Errors
    ///
    /// See [`GroupedSlots::new`].
    pub fn on_gpu(context: &GpuContext, options: Options) -> Result<Self, InstancerError> {
        let backend = WgpuBackend::new(context, &options.layers, &options.slots.label);
        Self::new(backend, options)
    }
}

impl<K: Eq + Hash + Clone, B: GroupBackend> BitmapSet<K, B> {
    /// Bitmap set over `backend` at generation 0.
    ///
    /// # Errors
    ///
    /// See [`GroupedSlots::new`].
    pub fn new(backend: B, options: Options) -> Result<Self, InstancerError> {
        let slots = GroupedSlots::new(backend, options.slots.max_per_group)?;
        Ok(Self {
            slots,
            generation: 0,
            options,
        })
    }

    /// Register the callback invoked once per newly created group.
    pub fn on_group_created(&mut self, listener: impl FnMut(GroupCreated) + 'static) {
        self.slots.on_group_created(listener);
    }

    /// Add a bitmap bound to `tag` at the current generation.
    ///
    /// # Errors
    ///
    /// See [`GroupedSlots::add`]; duplicate tags fail fast.
    pub fn add(
        &mut self,
        tag: K,
        placement: &BitmapPlacement,
        resource: B::Resource,
    ) -> Result<SlotAddress, InstancerError> {
        self.insert(Some(tag), placement, Some(resource), None)
    }

    /// Add a bitmap that owns `payload` until the slot is reclaimed.
    ///
    /// # Errors
    ///
    /// See [`GroupedSlots::add`].
    pub fn add_owned(
        &mut self,
        tag: K,
        placement: &BitmapPlacement,
        resource: B::Resource,
        payload: Box<dyn OwnedPayload>,
    ) -> Result<SlotAddress, InstancerError> {
        self.insert(Some(tag), placement, Some(resource), Some(payload))
    }

    /// Add a bitmap reachable only through its address.
    ///
    /// # Errors
    ///
    /// See [`GroupedSlots::add`].
    pub fn add_untagged(
        &mut self,
        placement: &BitmapPlacement,
        resource: B::Resource,
    ) -> Result<SlotAddress, InstancerError> {
        self.insert(None, placement, Some(resource), None)
    }

    fn insert(
        &mut self,
        tag: Option<K>,
        placement: &BitmapPlacement,
        resource: Option<B::Resource>,
        payload: Option<Box<dyn OwnedPayload>>,
    ) -> Result<SlotAddress, InstancerError> {
        let instance = NewInstance {
            tag,
            transform: placement.to_transform(),
            mode: placement.mode,
            payload,
            generation: self.generation,
        };
        self.slots.add(instance, resource)
    }

    /// Remove the bitmap bound to `tag`.
    pub fn remove(&mut self, tag: &K) -> bool {
        self.slots.remove(tag)
    }

    /// Remove the bitmap at `address`.
    pub fn remove_at(&mut self, address: SlotAddress) -> bool {
        self.slots.remove_at(address.group, address.slot)
    }

    /// Whether `tag` is live.
    #[must_use]
    pub fn exist(&self, tag: &K) -> bool {
        self.slots.exist(tag)
    }

    /// Change how the bitmap bound to `tag` faces the viewer (or hide it).
    pub fn set_visibility_rotation(
        &mut self,
        tag: &K,
        mode: VisibilityRotation,
    ) -> bool {
        self.slots.set_visibility_rotation(tag, mode)
    }

    /// Matrix bound to `tag`, or the culled sentinel.
    #[must_use]
    pub fn matrix(&self, tag: &K) -> Mat4 {
        self.slots.matrix(tag)
    }

    /// World position bound to `tag`, or zero.
    #[must_use]
    pub fn world_position(&self, tag: &K) -> Vec3 {
        self.slots.world_position(tag)
    }

    /// Remove every bitmap. Groups are kept.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Start a new generation and return it.
    pub fn advance_generation(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Evict bitmaps stamped before `remove_below`, renewing those tagged
    /// in `keep` to the current generation.
    pub fn remove_generation(
        &mut self,
        remove_below: u32,
        keep: &FxHashSet<K>,
    ) -> SweepReport {
        self.slots.remove_generation(remove_below, self.generation, keep)
    }

    /// Advance the generation, then evict everything not re-added (or kept)
    /// within the configured maximum age.
    pub fn increase_remove_generation(&mut self, keep: &FxHashSet<K>) -> SweepReport {
        let current = self.advance_generation();
        self.slots
            .increase_remove_generation(current, self.options.eviction.max_age, keep)
    }

    /// Flush and bind every group; see [`GroupedSlots::prepare`].
    pub fn prepare(&mut self) {
        self.slots.prepare();
    }

    /// Groups to draw this frame.
    pub fn groups(&self) -> impl Iterator<Item = GroupView<'_, B::Storage>> {
        self.slots.groups()
    }

    /// The underlying group manager.
    #[must_use]
    pub fn slots(&self) -> &GroupedSlots<K, B> {
        &self.slots
    }

    /// Options this set was built with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}
