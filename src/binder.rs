//! Per-slot external resource table kept in lock-step with a slot store.
//!
//! The table mirrors the resident handle each slot's instance samples from.
//! Entries are written strictly after the slot store hands out the index and
//! before the next `prepare`, which flushes the table to the GPU when it
//! changed.

use crate::backend::GroupBackend;
use crate::error::BackendError;

/// Fixed-size table of resident handles, one entry per slot.
#[derive(Debug, Clone)]
pub struct ResourceTable<H> {
    entries: Vec<Option<H>>,
    dirty: bool,
}

impl<H> ResourceTable<H> {
    /// Empty table with `capacity` entries.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let mut entries = Vec::with_capacity(capacity as usize);
        entries.resize_with(capacity as usize, || None);
        Self {
            entries,
            dirty: false,
        }
    }

    /// Overwrite the entry at `index`, returning the previous handle.
    ///
    /// # Errors
    ///
    /// [`BackendError::InvalidSlot`] if `index` is past the table end.
    pub fn write(&mut self, index: u32, handle: H) -> Result<Option<H>, BackendError> {
        let entry = self
            .entries
            .get_mut(index as usize)
            .ok_or(BackendError::InvalidSlot { slot: index })?;
        self.dirty = true;
        Ok(entry.replace(handle))
    }

    /// Take the handle out of `index`, if any.
    pub fn release(&mut self, index: u32) -> Option<H> {
        let handle = self.entries.get_mut(index as usize)?.take();
        if handle.is_some() {
            self.dirty = true;
        }
        handle
    }

    /// Handle recorded at `index`.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&H> {
        self.entries.get(index as usize)?.as_ref()
    }

    /// Take every handle out of the table, with its slot index.
    pub fn drain(&mut self) -> Vec<(u32, H)> {
        let drained: Vec<_> = self
            .entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, entry)| entry.take().map(|h| (i as u32, h)))
            .collect();
        if !drained.is_empty() {
            self.dirty = true;
        }
        drained
    }

    /// Number of entries (the slot capacity of the owning group).
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Number of occupied entries.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// Whether the table changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Upload `resource` for `slot` and record the resulting handle.
///
/// Any handle previously recorded at `slot` is handed back to the backend
/// for release.
///
/// # Errors
///
/// Propagates upload failures from the backend, and
/// [`BackendError::InvalidSlot`] when `slot` is outside the table.
pub fn bind_resource<B: GroupBackend>(
    backend: &mut B,
    storage: &mut B::Storage,
    table: &mut ResourceTable<B::Handle>,
    slot: u32,
    resource: B::Resource,
) -> Result<(), BackendError> {
    if slot >= table.capacity() {
        return Err(BackendError::InvalidSlot { slot });
    }
    let handle = backend.upload(storage, slot, resource)?;
    if let Some(previous) = table.write(slot, handle)? {
        backend.release(storage, slot, previous);
    }
    Ok(())
}

/// Drop the handle recorded at `slot`, if any.
pub fn unbind_resource<B: GroupBackend>(
    backend: &mut B,
    storage: &mut B::Storage,
    table: &mut ResourceTable<B::Handle>,
    slot: u32,
) {
    if let Some(handle) = table.release(slot) {
        backend.release(storage, slot, handle);
    }
}
