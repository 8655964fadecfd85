//! Host-memory [`GroupBackend`]: transform and handle tables in `Vec`s.
//!
//! Useful for CPU-only consumers (picking, hit-testing, exports) and as the
//! backend for tests. Handles are opaque `u64` ids.

use super::GroupBackend;
use crate::binder::ResourceTable;
use crate::error::BackendError;
use crate::slots::InstanceTransform;

/// A per-instance resource for the memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryResource {
    /// Already-resident handle, stored as is.
    Handle(u64),
    /// Tightly packed RGBA8 pixels; a fresh handle is minted on upload.
    Pixels {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// `width * height * 4` bytes.
        rgba: Vec<u8>,
    },
}

/// Host-side copy of one group.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    group: usize,
    transforms: Vec<InstanceTransform>,
    handles: Vec<Option<u64>>,
    bound_handles: Vec<Option<u64>>,
    binds: u32,
    refreshes: u32,
}

impl MemoryStorage {
    /// Index of the group this storage belongs to.
    #[must_use]
    pub fn group(&self) -> usize {
        self.group
    }

    /// Transform buffer contents (capacity-sized, zeroed when unwritten).
    #[must_use]
    pub fn transforms(&self) -> &[InstanceTransform] {
        &self.transforms
    }

    /// Resident handles as uploaded.
    #[must_use]
    pub fn handles(&self) -> &[Option<u64>] {
        &self.handles
    }

    /// Handle table as of the last refresh (what a shader would see).
    #[must_use]
    pub fn bound_handles(&self) -> &[Option<u64>] {
        &self.bound_handles
    }

    /// Number of binds issued.
    #[must_use]
    pub fn binds(&self) -> u32 {
        self.binds
    }

    /// Number of binds that refreshed the handle table.
    #[must_use]
    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }
}

/// Backend that keeps every group in host memory.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    max_per_group: u32,
    max_groups: Option<usize>,
    next_handle: u64,
    uploads: usize,
    released: Vec<u64>,
}

impl MemoryBackend {
    /// Backend whose groups hold at most `max_per_group` instances.
    #[must_use]
    pub fn new(max_per_group: u32) -> Self {
        Self {
            max_per_group,
            max_groups: None,
            next_handle: 1,
            uploads: 0,
            released: Vec::new(),
        }
    }

    /// Refuse to create more than `max_groups` groups.
    #[must_use]
    pub fn with_group_limit(mut self, max_groups: usize) -> Self {
        self.max_groups = Some(max_groups);
        self
    }

    /// Number of successful uploads.
    #[must_use]
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    /// Handles given back so far, in release order.
    #[must_use]
    pub fn released(&self) -> &[u64] {
        &self.released
    }
}

impl GroupBackend for MemoryBackend {
    type Storage = MemoryStorage;
    type Resource = MemoryResource;
    type Handle = u64;

    fn max_instances_per_group(&self) -> u32 {
        self.max_per_group
    }

    fn create_group(
        &mut self,
        group: usize,
        capacity: u32,
    ) -> Result<MemoryStorage, BackendError> {
        if let Some(limit) = self.max_groups {
            if group >= limit {
                return Err(BackendError::GroupLimit { limit });
            }
        }
        let capacity = capacity as usize;
        Ok(MemoryStorage {
            group,
            transforms: vec![bytemuck::Zeroable::zeroed(); capacity],
            handles: vec![None; capacity],
            bound_handles: vec![None; capacity],
            binds: 0,
            refreshes: 0,
        })
    }

    fn write_transforms(
        &mut self,
        storage: &mut MemoryStorage,
        first_slot: u32,
        transforms: &[InstanceTransform],
    ) {
        let first = first_slot as usize;
        let end = (first + transforms.len()).min(storage.transforms.len());
        if first < end {
            storage.transforms[first..end]
                .copy_from_slice(&transforms[..end - first]);
        }
    }

    fn upload(
        &mut self,
        storage: &mut MemoryStorage,
        slot: u32,
        resource: MemoryResource,
    ) -> Result<u64, BackendError> {
        let entry = storage
            .handles
            .get_mut(slot as usize)
            .ok_or(BackendError::InvalidSlot { slot })?;
        let handle = match resource {
            MemoryResource::Handle(handle) => handle,
            MemoryResource::Pixels {
                width,
                height,
                rgba,
            } => {
                let expected = width as usize * height as usize * 4;
                if rgba.len() != expected {
                    return Err(BackendError::ResourceMismatch(format!(
                        "{width}x{height} image needs {expected} bytes, got {}",
                        rgba.len()
                    )));
                }
                let handle = self.next_handle;
                self.next_handle += 1;
                handle
            }
        };
        *entry = Some(handle);
        self.uploads += 1;
        Ok(handle)
    }

    fn release(&mut self, storage: &mut MemoryStorage, slot: u32, handle: u64) {
        if let Some(entry) = storage.handles.get_mut(slot as usize) {
            if *entry == Some(handle) {
                *entry = None;
            }
        }
        self.released.push(handle);
    }

    fn bind(
        &mut self,
        storage: &mut MemoryStorage,
        table: &ResourceTable<u64>,
        table_dirty: bool,
    ) {
        storage.binds += 1;
        if table_dirty {
            storage.refreshes += 1;
            for (slot, bound) in storage.bound_handles.iter_mut().enumerate() {
                *bound = table.get(slot as u32).copied();
            }
        }
    }
}
