//! GPU resource management on wgpu.
//!
//! Provides an explicit device/queue context, fixed-capacity slot buffers,
//! per-group layer textures, and the [`backend::WgpuBackend`] that ties them
//! to the slot allocator.

/// wgpu implementation of the group backend.
pub mod backend;
/// Device and queue context.
pub mod context;
/// Per-group 2D texture array.
pub mod layer_texture;
/// Fixed-capacity slot-addressed buffers.
pub mod slot_buffer;
