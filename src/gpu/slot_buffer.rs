//! Fixed-capacity GPU buffers addressed by slot.
//!
//! Unlike a growable buffer, a slot buffer is never reallocated: slot
//! indices handed out by a slot store stay valid for the lifetime of the
//! group, and bind groups built over the buffer never need recreation.

use std::marker::PhantomData;

/// A GPU buffer holding `capacity` items of `T`, written in slot ranges.
pub struct SlotBuffer<T> {
    buffer: wgpu::Buffer,
    capacity: u32,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> SlotBuffer<T> {
    /// Zero-initialized buffer with room for `capacity` items.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        capacity: u32,
        usage: wgpu::BufferUsages,
    ) -> Self {
        let bytes = (size_of::<T>() * capacity as usize).max(64);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes as u64,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            capacity,
            _marker: PhantomData,
        }
    }

    /// Write `items` starting at slot `first`.
    ///
    /// Returns `false` (and writes nothing) if the span would run past the
    /// end of the buffer.
    pub fn write_range(&self, queue: &wgpu::Queue, first: u32, items: &[T]) -> bool {
        if items.is_empty() {
            return true;
        }
        let end = first as usize + items.len();
        if end > self.capacity as usize {
            log::warn!(
                "slot buffer write {first}..{end} exceeds capacity {}",
                self.capacity
            );
            return false;
        }
        let offset = (first as usize * size_of::<T>()) as u64;
        queue.write_buffer(&self.buffer, offset, bytemuck::cast_slice(items));
        true
    }

    /// The underlying wgpu buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Capacity in items.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
