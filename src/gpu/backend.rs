//! wgpu implementation of [`GroupBackend`].
//!
//! Each group owns:
//! - a storage buffer of [`InstanceTransform`] records (binding 0),
//! - a storage buffer of `u32` handles, one per slot (binding 1),
//! - a 2D texture array with one layer per slot (binding 2),
//! - a shared filtering sampler (binding 3).
//!
//! The vertex shader reads `transforms[instance_index]`, discards when the
//! visibility cell is negative, and samples either its own layer or an
//! externally resident image depending on the handle's top bit.

use super::context::GpuContext;
use super::layer_texture::LayerTexture;
use super::slot_buffer::SlotBuffer;
use crate::backend::GroupBackend;
use crate::binder::ResourceTable;
use crate::error::BackendError;
use crate::options::LayerOptions;
use crate::slots::InstanceTransform;

/// Handle-table value of a slot with no resource.
pub const EMPTY_HANDLE: u32 = u32::MAX;
/// Top bit of a handle-table value marks an externally resident image.
pub const EXTERNAL_BIT: u32 = 1 << 31;

/// What a caller hands in for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// RGBA8 pixels uploaded into the slot's own texture layer. Must match
    /// the configured layer size.
    Pixels {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// `width * height * 4` bytes, rows tightly packed.
        rgba: Vec<u8>,
    },
    /// Pre-resolved index into an externally managed bindless image array.
    Handle(u32),
}

/// Resident handle recorded in a group's resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerHandle {
    /// The group's own texture layer.
    Layer(u32),
    /// External bindless index.
    External(u32),
}

impl LayerHandle {
    /// Encoding written into the GPU handle table.
    #[must_use]
    pub fn to_gpu(self) -> u32 {
        match self {
            Self::Layer(layer) => layer,
            Self::External(index) => index | EXTERNAL_BIT,
        }
    }
}

/// Validate `source` against the group's layer size and resolve its handle.
///
/// # Errors
///
/// [`BackendError::ResourceMismatch`] for wrongly sized images or external
/// indices that collide with the tag bit.
pub fn resolve_source(
    source: &LayerSource,
    slot: u32,
    layer_size: (u32, u32),
) -> Result<LayerHandle, BackendError> {
    match source {
        LayerSource::Pixels {
            width,
            height,
            rgba,
        } => {
            if (*width, *height) != layer_size {
                return Err(BackendError::ResourceMismatch(format!(
                    "image is {width}x{height}, layers are {}x{}",
                    layer_size.0, layer_size.1
                )));
            }
            let expected = *width as usize * *height as usize * 4;
            if rgba.len() != expected {
                return Err(BackendError::ResourceMismatch(format!(
                    "{width}x{height} image needs {expected} bytes, got {}",
                    rgba.len()
                )));
            }
            Ok(LayerHandle::Layer(slot))
        }
        LayerSource::Handle(index) => {
            if index & EXTERNAL_BIT != 0 {
                return Err(BackendError::ResourceMismatch(format!(
                    "external handle {index} out of range"
                )));
            }
            Ok(LayerHandle::External(*index))
        }
    }
}

/// GPU-resident state of one group.
pub struct WgpuGroup {
    index: usize,
    transforms: SlotBuffer<InstanceTransform>,
    handles: SlotBuffer<u32>,
    layers: LayerTexture,
    bind_group: wgpu::BindGroup,
}

impl WgpuGroup {
    /// Group number.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bind group for `@group(N)` of the external instance pipeline.
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// The transform storage buffer.
    pub fn transform_buffer(&self) -> &wgpu::Buffer {
        self.transforms.buffer()
    }

    /// The per-group layer texture.
    pub fn layers(&self) -> &LayerTexture {
        &self.layers
    }
}

/// Backend allocating real GPU buffers and texture arrays.
pub struct WgpuBackend {
    context: GpuContext,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    layer_size: (u32, u32),
    label: String,
}

impl WgpuBackend {
    /// Backend on `context` with layers sized per `layers`.
    #[must_use]
    pub fn new(context: &GpuContext, layers: &LayerOptions, label: &str) -> Self {
        let layout = Self::create_bind_group_layout(&context.device, label);
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            context: context.clone(),
            layout,
            sampler,
            layer_size: (layers.width, layers.height),
            label: label.to_owned(),
        }
    }

    /// Layout shared by every group's bind group. The host pipeline uses it
    /// when building its pipeline layout.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    fn create_bind_group_layout(
        device: &wgpu::Device,
        label: &str,
    ) -> wgpu::BindGroupLayout {
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX
                | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} Layout")),
            entries: &[
                storage(0),
                storage(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float {
                            filterable: true,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(
                        wgpu::SamplerBindingType::Filtering,
                    ),
                    count: None,
                },
            ],
        })
    }
}

impl GroupBackend for WgpuBackend {
    type Storage = WgpuGroup;
    type Resource = LayerSource;
    type Handle = LayerHandle;

    fn max_instances_per_group(&self) -> u32 {
        let limits = self.context.limits();
        let by_binding = limits.max_storage_buffer_binding_size
            / size_of::<InstanceTransform>() as u32;
        limits.max_texture_array_layers.min(by_binding)
    }

    fn create_group(
        &mut self,
        group: usize,
        capacity: u32,
    ) -> Result<WgpuGroup, BackendError> {
        let device = &self.context.device;
        let label = &self.label;
        let transforms = SlotBuffer::new(
            device,
            &format!("{label} Transforms {group}"),
            capacity,
            wgpu::BufferUsages::STORAGE,
        );
        let handles = SlotBuffer::new(
            device,
            &format!("{label} Handles {group}"),
            capacity,
            wgpu::BufferUsages::STORAGE,
        );
        let empty = vec![EMPTY_HANDLE; capacity as usize];
        let _ = handles.write_range(&self.context.queue, 0, &empty);

        let layers = LayerTexture::new(
            device,
            &format!("{label} Layers {group}"),
            self.layer_size.0,
            self.layer_size.1,
            capacity,
        );
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} Bind Group {group}")),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: transforms.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: handles.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&layers.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        Ok(WgpuGroup {
            index: group,
            transforms,
            handles,
            layers,
            bind_group,
        })
    }

    fn write_transforms(
        &mut self,
        storage: &mut WgpuGroup,
        first_slot: u32,
        transforms: &[InstanceTransform],
    ) {
        let _ = storage
            .transforms
            .write_range(&self.context.queue, first_slot, transforms);
    }

    fn upload(
        &mut self,
        storage: &mut WgpuGroup,
        slot: u32,
        resource: LayerSource,
    ) -> Result<LayerHandle, BackendError> {
        if slot >= storage.layers.layers() {
            return Err(BackendError::InvalidSlot { slot });
        }
        let handle = resolve_source(&resource, slot, storage.layers.size())?;
        if let LayerSource::Pixels { rgba, .. } = &resource {
            storage.layers.write_layer(&self.context.queue, slot, rgba);
        }
        Ok(handle)
    }

    fn release(
        &mut self,
        _storage: &mut WgpuGroup,
        _slot: u32,
        _handle: LayerHandle,
    ) {
        // Layers are overwritten in place and external handles are owned by
        // their caller; the table refresh on bind is all that is needed.
    }

    fn bind(
        &mut self,
        storage: &mut WgpuGroup,
        table: &ResourceTable<LayerHandle>,
        table_dirty: bool,
    ) {
        if !table_dirty {
            return;
        }
        let encoded: Vec<u32> = (0..table.capacity())
            .map(|slot| table.get(slot).map_or(EMPTY_HANDLE, |h| h.to_gpu()))
            .collect();
        let _ = storage
            .handles
            .write_range(&self.context.queue, 0, &encoded);
        log::trace!("group {}: handle table refreshed", storage.index);
    }
}
