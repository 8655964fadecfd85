use std::fmt;

/// Errors that can occur during GPU context initialization.
#[derive(Debug)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    AdapterRequest(wgpu::RequestAdapterError),
    /// GPU device request failed (limits or features not met).
    DeviceRequest(wgpu::RequestDeviceError),
}

impl fmt::Display for RenderContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterRequest(e) => {
                write!(f, "no compatible GPU adapter found: {e}")
            }
            Self::DeviceRequest(e) => write!(f, "device request failed: {e}"),
        }
    }
}

impl std::error::Error for RenderContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AdapterRequest(e) => Some(e),
            Self::DeviceRequest(e) => Some(e),
        }
    }
}

/// Device and queue shared by every group created from it.
///
/// Passed explicitly to backend constructors; its lifetime bounds the
/// lifetime of every GPU resource the backend creates.
#[derive(Clone)]
pub struct GpuContext {
    /// The wgpu logical device.
    pub device: wgpu::Device,
    /// The wgpu command queue.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Wrap an externally-owned device and queue (e.g. the host
    /// application's renderer).
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Request an adapter and device with no presentation surface.
    ///
    /// The device is created with the adapter's full limits so large
    /// texture arrays are available.
    ///
    /// # Errors
    ///
    /// Returns `RenderContextError` if adapter or device request fails.
    pub async fn request_headless() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::AdapterRequest)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Instancer Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::DeviceRequest)?;

        log::info!("headless GPU context on {}", adapter.get_info().name);
        Ok(Self { device, queue })
    }

    /// Blocking variant of [`GpuContext::request_headless`].
    ///
    /// # Errors
    ///
    /// Returns `RenderContextError` if adapter or device request fails.
    #[cfg(feature = "headless")]
    pub fn request_headless_blocking() -> Result<Self, RenderContextError> {
        pollster::block_on(Self::request_headless())
    }

    /// Limits of the underlying device.
    #[must_use]
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}
