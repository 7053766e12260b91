//! Shared device/queue handle and small dispatch helpers.

use std::sync::Arc;

use crate::error::{RenderError, RenderResult};

/// Workgroup width used by every compute shader in the crate.
pub const WORKGROUP_SIZE: u32 = 64;

/// Per-dimension dispatch limit guaranteed by WebGPU.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// Device and queue shared between the translator, the picker and the
/// terrain pipeline. Cloning is cheap.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Wrap a device/queue pair owned by the embedding application.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Request a headless high-performance adapter and device.
    pub async fn request() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::device("No suitable GPU adapter"))?;

        let info = adapter.get_info();
        log::info!("geodrape adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("geodrape-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::device(format!("request_device failed: {}", e)))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Blocking variant of [`GpuContext::request`].
    pub fn request_blocking() -> RenderResult<Self> {
        pollster::block_on(Self::request())
    }
}

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

/// Number of workgroups needed to cover `items` invocations.
#[inline]
pub fn workgroups_for(items: u32) -> u32 {
    (items + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

/// Split a 1D workgroup count into a 2D grid that respects the
/// per-dimension limit. Shaders rebuild the linear index from
/// `num_workgroups`.
pub fn dispatch_grid(workgroups: u32) -> (u32, u32) {
    let x = workgroups.clamp(1, MAX_WORKGROUPS_PER_DIM);
    let y = (workgroups + x - 1) / x;
    (x, y.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_copy_bpr() {
        assert_eq!(align_copy_bpr(4), 256);
        assert_eq!(align_copy_bpr(256), 256);
        assert_eq!(align_copy_bpr(257), 512);
    }

    #[test]
    fn test_dispatch_grid_splits_large_counts() {
        assert_eq!(dispatch_grid(0), (1, 1));
        assert_eq!(dispatch_grid(10), (10, 1));
        let (x, y) = dispatch_grid(200_000);
        assert_eq!(x, MAX_WORKGROUPS_PER_DIM);
        assert!(x as u64 * y as u64 >= 200_000);
    }

    #[test]
    fn test_workgroups_for_rounds_up() {
        assert_eq!(workgroups_for(0), 0);
        assert_eq!(workgroups_for(1), 1);
        assert_eq!(workgroups_for(64), 1);
        assert_eq!(workgroups_for(65), 2);
    }
}
