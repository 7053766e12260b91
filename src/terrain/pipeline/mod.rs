//! Terrain drape compute pipeline.
//!
//! Five passes recorded into one encoder and one submission:
//! count → offset (single-workgroup scan) → subdivide → mesh → drape.
//! Buffers are sized once from [`TerrainConfig`] and rewritten each run.
//! group(0) holds the params UBO and all storage buffers, group(1) the
//! height texture and sampler so a raster swap rebuilds only that group.

use std::sync::Arc;

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;
use wgpu::*;

use crate::config::TerrainConfig;
use crate::core::async_readback::ReadbackBuffer;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{dispatch_grid, workgroups_for, GpuContext};

use super::resources::{ResourceUpdate, TerrainResources};
use super::types::{DrapeParams, DrawTotals, FeatureStyle, OutputVertex, SegmentWork, TerrainSegment};

mod bind_groups;
mod creation;
mod shader;

use creation::{DrapeLayouts, DrapePasses};

/// Storage buffers bound per compute stage
const STORAGE_BUFFERS_PER_STAGE: u32 = 8;

/// Element capacities of the fixed-size buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCapacity {
    pub segments: u32,
    pub coarse_vertices: u32,
    pub points: u32,
    pub vertices: u32,
    pub indices: u32,
}

impl PipelineCapacity {
    /// Element counts implied by the config. Counts that do not fit the
    /// shaders' u32 indices are a config error.
    pub fn from_config(config: &TerrainConfig) -> RenderResult<Self> {
        let max_sub = config.max_subdivision_factor.max(1);
        let overflow = || {
            RenderError::config(format!(
                "terrain capacity overflows u32: {} segments x {} subdivisions",
                config.max_segments, max_sub
            ))
        };
        let points = max_sub
            .checked_add(1)
            .and_then(|p| p.checked_mul(config.max_segments))
            .ok_or_else(overflow)?;
        let vertices = points.checked_mul(2).ok_or_else(overflow)?;
        let indices = config
            .max_segments
            .checked_mul(max_sub)
            .and_then(|i| i.checked_mul(6))
            .ok_or_else(overflow)?;
        Ok(Self {
            segments: config.max_segments,
            coarse_vertices: config.max_coarse_vertices,
            points,
            vertices,
            indices,
        })
    }
}

pub(super) struct DrapeBuffers {
    pub params: Buffer,
    pub coarse: Buffer,
    pub segments: Buffer,
    pub styles: Buffer,
    pub work: Buffer,
    pub points: Buffer,
    pub vertices: Arc<Buffer>,
    pub indices: Arc<Buffer>,
    pub totals: Arc<Buffer>,
}

/// Buffers produced by one run. `indirect` holds `DrawIndexedIndirect`
/// arguments at offset 0.
#[derive(Clone)]
pub struct TerrainOutput {
    pub vertices: Arc<Buffer>,
    pub indices: Arc<Buffer>,
    pub indirect: Arc<Buffer>,
    pub segment_count: u32,
    /// Upper bounds; the exact counts live in `indirect`
    pub max_vertex_count: u32,
    pub max_index_count: u32,
}

/// CPU copy of the pipeline outputs
#[derive(Debug, Clone, Default)]
pub struct TerrainReadback {
    pub totals: DrawTotals,
    pub work: Vec<SegmentWork>,
    pub vertices: Vec<OutputVertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TerrainPipelineStats {
    pub executions: u64,
    pub last_segment_count: u32,
    pub last_coarse_vertex_count: u32,
    pub last_feature_count: u32,
    /// Segments dropped by capacity truncation over the pipeline's lifetime
    pub truncated_segments: u64,
    pub bind_group_rebuilds: u64,
    pub params_writes: u64,
    /// Workgroup grids of the last run, in pass order
    pub last_dispatch: [(u32, u32); 5],
}

pub struct TerrainComputePipeline {
    gpu: GpuContext,
    config: TerrainConfig,
    capacity: PipelineCapacity,
    layouts: DrapeLayouts,
    passes: DrapePasses,
    buffers: DrapeBuffers,
    bg_buffers: BindGroup,
    bg_terrain: Option<BindGroup>,
    terrain: Option<TerrainResources>,
    segment_count: u32,
    coarse_count: u32,
    feature_count: u32,
    stats: TerrainPipelineStats,
}

fn storage_buffer(device: &Device, label: &str, size: u64, extra: BufferUsages) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: size.max(16),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC | extra,
        mapped_at_creation: false,
    })
}

impl TerrainComputePipeline {
    /// Allocate every buffer at fixed capacity and build the pass pipelines.
    pub fn new(gpu: GpuContext, config: TerrainConfig) -> RenderResult<Self> {
        let device = &gpu.device;
        let limits = device.limits();
        if limits.max_storage_buffers_per_shader_stage < STORAGE_BUFFERS_PER_STAGE {
            return Err(RenderError::device(format!(
                "terrain pipeline needs {} storage buffers per stage, device allows {}",
                STORAGE_BUFFERS_PER_STAGE, limits.max_storage_buffers_per_shader_stage
            )));
        }

        let capacity = PipelineCapacity::from_config(&config)?;
        let vertex_bytes = capacity.vertices as u64 * std::mem::size_of::<OutputVertex>() as u64;
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        if vertex_bytes > max_binding || vertex_bytes > limits.max_buffer_size {
            return Err(RenderError::device(format!(
                "terrain vertex buffer of {} bytes exceeds device limits (binding {}, buffer {})",
                vertex_bytes, max_binding, limits.max_buffer_size
            )));
        }

        let layouts = creation::create_layouts(device);
        let passes = creation::create_passes(device, &layouts);

        let params = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("geodrape.Terrain.params"),
            contents: bytemuck::bytes_of(&DrapeParams::zeroed()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let buffers = DrapeBuffers {
            params,
            coarse: storage_buffer(
                device,
                "geodrape.Terrain.coarse",
                capacity.coarse_vertices as u64 * 16,
                BufferUsages::empty(),
            ),
            segments: storage_buffer(
                device,
                "geodrape.Terrain.segments",
                capacity.segments as u64 * std::mem::size_of::<TerrainSegment>() as u64,
                BufferUsages::empty(),
            ),
            styles: storage_buffer(
                device,
                "geodrape.Terrain.styles",
                capacity.segments as u64 * std::mem::size_of::<FeatureStyle>() as u64,
                BufferUsages::empty(),
            ),
            work: storage_buffer(
                device,
                "geodrape.Terrain.work",
                capacity.segments as u64 * std::mem::size_of::<SegmentWork>() as u64,
                BufferUsages::empty(),
            ),
            points: storage_buffer(
                device,
                "geodrape.Terrain.points",
                capacity.points as u64 * 16,
                BufferUsages::empty(),
            ),
            vertices: Arc::new(storage_buffer(
                device,
                "geodrape.Terrain.vertices",
                vertex_bytes,
                BufferUsages::VERTEX,
            )),
            indices: Arc::new(storage_buffer(
                device,
                "geodrape.Terrain.indices",
                capacity.indices as u64 * 4,
                BufferUsages::INDEX,
            )),
            totals: Arc::new(storage_buffer(
                device,
                "geodrape.Terrain.totals",
                std::mem::size_of::<DrawTotals>() as u64,
                BufferUsages::INDIRECT,
            )),
        };
        let bg_buffers = bind_groups::make_bg_buffers(&layouts, device, &buffers);

        log::info!(
            "terrain pipeline: {} segments, {} coarse vertices, {} output vertices",
            capacity.segments,
            capacity.coarse_vertices,
            capacity.vertices
        );

        Ok(Self {
            gpu,
            config,
            capacity,
            layouts,
            passes,
            buffers,
            bg_buffers,
            bg_terrain: None,
            terrain: None,
            segment_count: 0,
            coarse_count: 0,
            feature_count: 0,
            stats: TerrainPipelineStats::default(),
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn capacity(&self) -> PipelineCapacity {
        self.capacity
    }

    pub fn stats(&self) -> TerrainPipelineStats {
        self.stats
    }

    pub fn has_terrain(&self) -> bool {
        self.bg_terrain.is_some()
    }

    pub fn terrain(&self) -> Option<&TerrainResources> {
        self.terrain.as_ref()
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// Swap in new raster resources. A new view or sampler rebuilds only the
    /// terrain bind group; new bounds only rewrite the params uniform.
    pub fn update_terrain_resources(&mut self, resources: TerrainResources) -> ResourceUpdate {
        let update = resources.diff(self.terrain.as_ref());
        if update.rebuilt_bind_group() {
            self.bg_terrain = Some(bind_groups::make_bg_terrain(
                &self.layouts,
                &self.gpu.device,
                &resources.view,
                &resources.sampler,
            ));
            self.stats.bind_group_rebuilds += 1;
        }
        self.terrain = Some(resources);
        if update.rewrote_params() {
            self.write_params();
        }
        log::debug!("terrain resources updated: {:?}", update);
        update
    }

    fn write_params(&mut self) {
        if let Some(terrain) = &self.terrain {
            let params = DrapeParams::new(&self.config, &terrain.bounds, self.segment_count);
            self.gpu
                .queue
                .write_buffer(&self.buffers.params, 0, bytemuck::bytes_of(&params));
            self.stats.params_writes += 1;
        }
    }

    /// Write coarse vertices, segments and styles. Input beyond capacity is
    /// truncated with a warning; segments that reference dropped vertices or
    /// styles go with them. Returns the number of segments kept.
    pub fn upload(&mut self, coarse: &[[f32; 4]], segments: &[TerrainSegment], styles: &[FeatureStyle]) -> u32 {
        let coarse = &coarse[..coarse.len().min(self.capacity.coarse_vertices as usize)];
        let styles = &styles[..styles.len().min(self.capacity.segments as usize)];

        let mut kept: Vec<TerrainSegment> = segments
            .iter()
            .copied()
            .filter(|s| {
                (s.start_vertex as usize) < coarse.len()
                    && (s.end_vertex as usize) < coarse.len()
                    && (s.feature_index as usize) < styles.len()
            })
            .collect();
        kept.truncate(self.capacity.segments as usize);

        let dropped = segments.len() - kept.len();
        if dropped > 0 {
            log::warn!(
                "terrain upload truncated: {} of {} segments dropped (capacity {} segments, {} vertices)",
                dropped,
                segments.len(),
                self.capacity.segments,
                self.capacity.coarse_vertices
            );
            self.stats.truncated_segments += dropped as u64;
        }

        let queue = &self.gpu.queue;
        if !coarse.is_empty() {
            queue.write_buffer(&self.buffers.coarse, 0, bytemuck::cast_slice(coarse));
        }
        if !kept.is_empty() {
            queue.write_buffer(&self.buffers.segments, 0, bytemuck::cast_slice(&kept));
        }
        if !styles.is_empty() {
            queue.write_buffer(&self.buffers.styles, 0, bytemuck::cast_slice(styles));
        }

        self.segment_count = kept.len() as u32;
        self.coarse_count = coarse.len() as u32;
        self.feature_count = styles.len() as u32;
        self.segment_count
    }

    /// Run all five passes over the uploaded segments in one submission.
    /// `None` when there is nothing to drape or no terrain is bound.
    pub fn execute(&mut self) -> Option<TerrainOutput> {
        if self.segment_count == 0 {
            return None;
        }
        if self.bg_terrain.is_none() {
            log::debug!("terrain execute skipped: no terrain resources");
            return None;
        }
        self.write_params();

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("geodrape.Terrain.encoder"),
            });
        let dispatch = self.encode_passes(&mut encoder)?;
        self.gpu.queue.submit(Some(encoder.finish()));

        self.stats.executions += 1;
        self.stats.last_segment_count = self.segment_count;
        self.stats.last_coarse_vertex_count = self.coarse_count;
        self.stats.last_feature_count = self.feature_count;
        self.stats.last_dispatch = dispatch;

        let per_segment = self.config.max_subdivision_factor.max(1);
        Some(TerrainOutput {
            vertices: self.buffers.vertices.clone(),
            indices: self.buffers.indices.clone(),
            indirect: self.buffers.totals.clone(),
            segment_count: self.segment_count,
            max_vertex_count: self.segment_count * (per_segment + 1) * 2,
            max_index_count: self.segment_count * per_segment * 6,
        })
    }

    fn encode_passes(&self, encoder: &mut CommandEncoder) -> Option<[(u32, u32); 5]> {
        let bg_terrain = self.bg_terrain.as_ref()?;
        let n = self.segment_count;
        let points_estimate = n * (self.config.max_subdivision_factor.max(1) + 1);

        let per_segment = dispatch_grid(workgroups_for(n));
        let dispatch = [
            per_segment,
            (1, 1),
            per_segment,
            dispatch_grid(workgroups_for(points_estimate)),
            dispatch_grid(workgroups_for(points_estimate * 2)),
        ];
        let pipelines = [
            ("geodrape.Terrain.pass.count", &self.passes.count),
            ("geodrape.Terrain.pass.offset", &self.passes.offset),
            ("geodrape.Terrain.pass.subdivide", &self.passes.subdivide),
            ("geodrape.Terrain.pass.mesh", &self.passes.mesh),
            ("geodrape.Terrain.pass.drape", &self.passes.drape),
        ];

        for ((label, pipeline), (x, y)) in pipelines.into_iter().zip(dispatch) {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bg_buffers, &[]);
            pass.set_bind_group(1, bg_terrain, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        Some(dispatch)
    }

    /// Copy totals, per-segment work, vertices and indices back to the CPU.
    pub async fn read_output(&self) -> RenderResult<TerrainReadback> {
        if self.segment_count == 0 {
            return Ok(TerrainReadback::default());
        }
        let device = &self.gpu.device;

        let totals_size = std::mem::size_of::<DrawTotals>() as u64;
        let work_size = self.segment_count as u64 * std::mem::size_of::<SegmentWork>() as u64;
        let totals_rb = ReadbackBuffer::new(device, totals_size, "geodrape.Terrain.TotalsReadback");
        let work_rb = ReadbackBuffer::new(device, work_size, "geodrape.Terrain.WorkReadback");
        self.copy_to(&self.buffers.totals, &totals_rb, totals_size);
        self.copy_to(&self.buffers.work, &work_rb, work_size);

        let totals: DrawTotals = bytemuck::pod_read_unaligned(&totals_rb.read(device, totals_size).await?);
        let work: Vec<SegmentWork> = bytemuck::pod_collect_to_vec(&work_rb.read(device, work_size).await?);

        let vertex_count = totals.vertex_count.min(self.capacity.vertices);
        let index_count = totals.index_count.min(self.capacity.indices);
        if vertex_count != totals.vertex_count || index_count != totals.index_count {
            return Err(RenderError::readback(format!(
                "terrain totals exceed capacity: {} vertices, {} indices",
                totals.vertex_count, totals.index_count
            )));
        }

        let vertices = if vertex_count > 0 {
            let size = vertex_count as u64 * std::mem::size_of::<OutputVertex>() as u64;
            let rb = ReadbackBuffer::new(device, size, "geodrape.Terrain.VertexReadback");
            self.copy_to(&self.buffers.vertices, &rb, size);
            bytemuck::pod_collect_to_vec(&rb.read(device, size).await?)
        } else {
            Vec::new()
        };
        let indices = if index_count > 0 {
            let size = index_count as u64 * 4;
            let rb = ReadbackBuffer::new(device, size, "geodrape.Terrain.IndexReadback");
            self.copy_to(&self.buffers.indices, &rb, size);
            bytemuck::pod_collect_to_vec(&rb.read(device, size).await?)
        } else {
            Vec::new()
        };

        Ok(TerrainReadback {
            totals,
            work,
            vertices,
            indices,
        })
    }

    fn copy_to(&self, source: &Buffer, target: &ReadbackBuffer, size: u64) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("geodrape.Terrain.readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, target.buffer(), 0, size);
        self.gpu.queue.submit(Some(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_from_default_config() {
        let c = PipelineCapacity::from_config(&TerrainConfig::default()).unwrap();
        assert_eq!(c.segments, 16_384);
        assert_eq!(c.points, 16_384 * 17);
        assert_eq!(c.vertices, 16_384 * 17 * 2);
        assert_eq!(c.indices, 16_384 * 16 * 6);
    }

    #[test]
    fn test_capacity_overflow_is_config_error() {
        let config = TerrainConfig {
            max_segments: u32::MAX / 4,
            max_subdivision_factor: 16,
            ..Default::default()
        };
        let err = PipelineCapacity::from_config(&config).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));

        let config = TerrainConfig {
            max_subdivision_factor: u32::MAX,
            ..Default::default()
        };
        assert!(PipelineCapacity::from_config(&config).is_err());
    }
}
