//! The seam between slot allocation and whatever owns the GPU memory.
//!
//! A backend creates the per-group storage (transform buffer and resource
//! table), uploads per-instance resources, and refreshes derived state right
//! before a group is drawn. [`crate::gpu::backend::WgpuBackend`] is the GPU
//! implementation; [`memory::MemoryBackend`] keeps everything in host memory
//! for headless use and tests.

/// Host-memory backend.
pub mod memory;

use crate::binder::ResourceTable;
use crate::error::BackendError;
use crate::slots::InstanceTransform;

/// Storage provider for instance groups.
pub trait GroupBackend {
    /// Per-group state: the transform buffer, the resource table storage and
    /// anything the draw call binds.
    type Storage;
    /// What callers hand in per instance (raw pixels, a pre-resolved
    /// handle, ...).
    type Resource;
    /// Resident handle recorded in a group's [`ResourceTable`].
    type Handle;

    /// Largest group the backend can address in one draw call (texture
    /// array depth, storage binding size, ...).
    fn max_instances_per_group(&self) -> u32;

    /// Allocate storage for group number `group` with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::GroupLimit`] when no further group can be
    /// allocated.
    fn create_group(
        &mut self,
        group: usize,
        capacity: u32,
    ) -> Result<Self::Storage, BackendError>;

    /// Copy `transforms` into the group's buffer starting at `first_slot`.
    fn write_transforms(
        &mut self,
        storage: &mut Self::Storage,
        first_slot: u32,
        transforms: &[InstanceTransform],
    );

    /// Make `resource` resident for `slot` and return its handle.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ResourceMismatch`] when the resource cannot
    /// be stored in this group.
    fn upload(
        &mut self,
        storage: &mut Self::Storage,
        slot: u32,
        resource: Self::Resource,
    ) -> Result<Self::Handle, BackendError>;

    /// Give back a handle that is no longer referenced by `slot`.
    fn release(
        &mut self,
        storage: &mut Self::Storage,
        slot: u32,
        handle: Self::Handle,
    );

    /// Called once per frame right before the group is drawn.
    /// `table_dirty` is set when the resource table changed since the
    /// previous bind, so derived GPU state must be refreshed.
    fn bind(
        &mut self,
        storage: &mut Self::Storage,
        table: &ResourceTable<Self::Handle>,
        table_dirty: bool,
    );
}
