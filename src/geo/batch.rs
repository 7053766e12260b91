// src/geo/batch.rs
// Compute-shader projection of coordinate batches
// Mirrors mercator::geo_to_world + world_to_render in f32 on the device.
// Inputs are offsets from the reference point taken in f64 on the host, and
// the latitude term is evaluated as a Mercator difference so nothing large
// cancels in f32.

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};

use crate::core::async_readback::ReadbackBuffer;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{dispatch_grid, workgroups_for, GpuContext};

use super::mercator::{clamp_latitude, RenderCoordinate};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ProjectionParams {
    sin_ref_lat: f32,
    cos_ref_lat: f32,
    scale: f32,
    count: u32,
}

impl ProjectionParams {
    fn new(ref_lat_deg: f64, scale: f32, count: u32) -> Self {
        let phi = clamp_latitude(ref_lat_deg).to_radians();
        Self {
            sin_ref_lat: phi.sin() as f32,
            cos_ref_lat: phi.cos() as f32,
            scale,
            count,
        }
    }
}

const MIN_CAPACITY: u64 = 1024;

/// Grow-only device buffers plus the projection pipeline
pub struct BatchProjector {
    gpu: GpuContext,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    input_buffer: Option<wgpu::Buffer>,
    output_buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
    readback: ReadbackBuffer,
    capacity: u64,
}

impl BatchProjector {
    pub fn new(gpu: GpuContext) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("geodrape.Geo.Projection.Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(PROJECTION_SHADER)),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("geodrape.Geo.Projection.BindGroupLayout"),
            entries: &[
                storage(0, true),
                storage(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("geodrape.Geo.Projection.PipelineLayout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("geodrape.Geo.Projection.Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geodrape.Geo.Projection.Params"),
            size: std::mem::size_of::<ProjectionParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let readback = ReadbackBuffer::new(device, MIN_CAPACITY * 8, "geodrape.Geo.Projection.Readback");

        Self {
            gpu,
            pipeline,
            bind_group_layout,
            params_buffer,
            input_buffer: None,
            output_buffer: None,
            bind_group: None,
            readback,
            capacity: 0,
        }
    }

    /// Bytes currently held on the device by this projector
    pub fn held_bytes(&self) -> u64 {
        let io = if self.input_buffer.is_some() {
            self.capacity * 8 * 2
        } else {
            0
        };
        io + self.readback.size() + std::mem::size_of::<ProjectionParams>() as u64
    }

    fn ensure_capacity(&mut self, count: u64) -> RenderResult<()> {
        if count <= self.capacity && self.bind_group.is_some() {
            return Ok(());
        }
        let device = &self.gpu.device;
        let new_capacity = count.max(self.capacity * 2).max(MIN_CAPACITY);
        let bytes = new_capacity * 8;
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        if bytes > limit {
            return Err(RenderError::device(format!(
                "projection batch of {} bytes exceeds storage binding limit {}",
                bytes, limit
            )));
        }

        let input = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geodrape.Geo.Projection.Input"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geodrape.Geo.Projection.Output"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("geodrape.Geo.Projection.BindGroup"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });
        self.readback.ensure_capacity(device, bytes);

        log::debug!("projection buffers grown to {} coordinates", new_capacity);
        self.input_buffer = Some(input);
        self.output_buffer = Some(output);
        self.bind_group = Some(bind_group);
        self.capacity = new_capacity;
        Ok(())
    }

    /// Project `[lng - ref_lng, lat - ref_lat]` degree offsets (latitudes
    /// clamped before subtracting). Errors are reported, never partially
    /// applied.
    pub async fn project(
        &mut self,
        deltas: &[[f32; 2]],
        ref_lat: f64,
        scale: f32,
    ) -> RenderResult<Vec<RenderCoordinate>> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        let count = u32::try_from(deltas.len())
            .map_err(|_| RenderError::upload("projection batch exceeds u32 range"))?;

        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let grow = self.ensure_capacity(count as u64);
        let oom = self.gpu.device.pop_error_scope().await;
        let invalid = self.gpu.device.pop_error_scope().await;
        grow?;
        if let Some(err) = oom.or(invalid) {
            self.bind_group = None;
            self.capacity = 0;
            return Err(RenderError::device(format!("projection buffer allocation failed: {}", err)));
        }

        let (input, output, bind_group) = match (&self.input_buffer, &self.output_buffer, &self.bind_group) {
            (Some(i), Some(o), Some(b)) => (i, o, b),
            _ => return Err(RenderError::device("projection buffers unavailable")),
        };

        let params = ProjectionParams::new(ref_lat, scale, count);
        let queue = &self.gpu.queue;
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(input, 0, bytemuck::cast_slice(deltas));

        self.readback.settle(&self.gpu.device);

        let byte_len = count as u64 * 8;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("geodrape.Geo.Projection.Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("geodrape.Geo.Projection.Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            let (x, y) = dispatch_grid(workgroups_for(count));
            pass.dispatch_workgroups(x, y, 1);
        }
        encoder.copy_buffer_to_buffer(output, 0, self.readback.buffer(), 0, byte_len);
        queue.submit(Some(encoder.finish()));

        let bytes = self.readback.read(&self.gpu.device, byte_len).await?;
        let values: Vec<[f32; 2]> = bytemuck::pod_collect_to_vec(&bytes);
        Ok(values.iter().map(|v| RenderCoordinate::new(v[0], v[1])).collect())
    }
}

const PROJECTION_SHADER: &str = r#"
struct Params {
    sin_ref_lat: f32,
    cos_ref_lat: f32,
    scale: f32,
    count: u32,
};

@group(0) @binding(0) var<storage, read> input: array<vec2<f32>>;
@group(0) @binding(1) var<storage, read_write> output: array<vec2<f32>>;
@group(0) @binding(2) var<uniform> params: Params;

const PI: f32 = 3.14159265358979;
// below this the series are exact to f32 and avoid the builtins' absolute error bound
const SMALL_ANGLE: f32 = 0.05;
const SMALL_RATIO: f32 = 0.125;

fn sin_small(h: f32) -> f32 {
    if (abs(h) >= SMALL_ANGLE) {
        return sin(h);
    }
    let h2 = h * h;
    return h * (1.0 - h2 / 6.0 * (1.0 - h2 / 20.0 * (1.0 - h2 / 42.0)));
}

fn cos_small(h: f32) -> f32 {
    if (abs(h) >= SMALL_ANGLE) {
        return cos(h);
    }
    let h2 = h * h;
    return 1.0 - h2 / 2.0 * (1.0 - h2 / 12.0 * (1.0 - h2 / 30.0));
}

fn atanh_stable(x: f32) -> f32 {
    if (abs(x) >= SMALL_RATIO) {
        return 0.5 * log((1.0 + x) / (1.0 - x));
    }
    let x2 = x * x;
    return x * (1.0 + x2 * (1.0 / 3.0 + x2 * (1.0 / 5.0 + x2 * (1.0 / 7.0 + x2 * (1.0 / 9.0 + x2 / 11.0)))));
}

@compute @workgroup_size(64)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = gid.x + gid.y * nwg.x * 64u;
    if (i >= params.count) {
        return;
    }
    let g = input[i];

    // sin(lat) - sin(ref) = 2 cos(ref + h) sin(h), h = half the offset
    let h = radians(g.y) * 0.5;
    let sh = sin_small(h);
    let cos_mean = params.cos_ref_lat * cos_small(h) - params.sin_ref_lat * sh;
    let ds = 2.0 * cos_mean * sh;
    // merc(lat) - merc(ref) = atanh((s - s0) / (1 - s s0)), 1 - s s0 = cos0^2 - ds s0
    let denom = params.cos_ref_lat * params.cos_ref_lat - ds * params.sin_ref_lat;
    let dmerc = atanh_stable(ds / denom);

    output[i] = vec2<f32>(
        g.x / 360.0 * params.scale,
        dmerc / (2.0 * PI) * params.scale,
    );
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::mercator::{geo_to_world, world_to_render, GeographicCoordinate};

    // f32 transcription of PROJECTION_SHADER
    fn project_f32(d: [f32; 2], p: &ProjectionParams) -> [f32; 2] {
        let sin_small = |h: f32| {
            if h.abs() >= 0.05 {
                return h.sin();
            }
            let h2 = h * h;
            h * (1.0 - h2 / 6.0 * (1.0 - h2 / 20.0 * (1.0 - h2 / 42.0)))
        };
        let cos_small = |h: f32| {
            if h.abs() >= 0.05 {
                return h.cos();
            }
            let h2 = h * h;
            1.0 - h2 / 2.0 * (1.0 - h2 / 12.0 * (1.0 - h2 / 30.0))
        };
        let atanh_stable = |x: f32| {
            if x.abs() >= 0.125 {
                return 0.5 * ((1.0 + x) / (1.0 - x)).ln();
            }
            let x2 = x * x;
            x * (1.0 + x2 * (1.0 / 3.0 + x2 * (1.0 / 5.0 + x2 * (1.0 / 7.0 + x2 * (1.0 / 9.0 + x2 / 11.0)))))
        };

        let h = d[1].to_radians() * 0.5;
        let sh = sin_small(h);
        let cos_mean = p.cos_ref_lat * cos_small(h) - p.sin_ref_lat * sh;
        let ds = 2.0 * cos_mean * sh;
        let denom = p.cos_ref_lat * p.cos_ref_lat - ds * p.sin_ref_lat;
        let dmerc = atanh_stable(ds / denom);
        [
            d[0] / 360.0 * p.scale,
            dmerc / (2.0 * std::f32::consts::PI) * p.scale,
        ]
    }

    fn worst_error(reference: GeographicCoordinate, zoom: f64) -> f32 {
        let ref_world = geo_to_world(reference);
        let params = ProjectionParams::new(reference.lat, zoom.exp2() as f32, 0);
        let mut worst = 0.0f32;
        for i in 0..32 {
            for j in 0..32 {
                let geo = GeographicCoordinate::new(
                    reference.lng - 0.4 + i as f64 * 0.025,
                    reference.lat - 0.3 + j as f64 * 0.019,
                );
                let expected = world_to_render(geo_to_world(geo), ref_world, zoom);
                let d = [
                    (geo.lng - reference.lng) as f32,
                    (clamp_latitude(geo.lat) - clamp_latitude(reference.lat)) as f32,
                ];
                let [x, y] = project_f32(d, &params);
                worst = worst.max((x - expected.x).abs()).max((y - expected.y).abs());
            }
        }
        worst
    }

    #[test]
    fn test_relative_projection_holds_precision_at_high_zoom() {
        let berlin = GeographicCoordinate::new(13.4, 52.5);
        for zoom in [4.0, 12.0, 16.0] {
            let err = worst_error(berlin, zoom);
            assert!(err < 1e-4, "zoom {}: worst error {}", zoom, err);
        }
    }

    #[test]
    fn test_relative_projection_far_south_and_near_clamp() {
        for reference in [
            GeographicCoordinate::new(-70.6, -33.4),
            GeographicCoordinate::new(0.0, 84.9),
        ] {
            let err = worst_error(reference, 12.0);
            assert!(err < 1e-4, "{:?}: worst error {}", reference, err);
        }
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<ProjectionParams>(), 16);
        let p = ProjectionParams::new(90.0, 1.0, 3);
        let limit = crate::geo::mercator::MAX_LATITUDE.to_radians();
        assert!((p.sin_ref_lat as f64 - limit.sin()).abs() < 1e-7);
    }
}
