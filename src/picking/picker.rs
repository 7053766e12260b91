// src/picking/picker.rs
// Hidden-buffer picker: feature table, shared geometry upload, dual-pass render and texel readback

use std::collections::{BTreeMap, HashMap};

use glam::{Mat4, Vec4};

use crate::config::PickingConfig;
use crate::core::async_readback::{depad_rows, encode_texture_region_copy, ReadbackBuffer};
use crate::error::{RenderError, RenderResult};
use crate::geo::{CoordinateTranslator, GeographicCoordinate, RenderCoordinate};
use crate::gpu::{align_copy_bpr, GpuContext};

use super::feature::{Feature, FeatureRecord};
use super::id_buffer::IdBufferPass;
use super::identity::IdentityTable;
use super::triangulate::{triangulate, PickVertex};

const MIN_VERTEX_CAPACITY: usize = 1024;
const MIN_INDEX_CAPACITY: usize = 3072;

/// Result of a successful pick
#[derive(Debug, Clone)]
pub struct PickResult {
    /// The feature exactly as it was added
    pub feature: Feature,
    pub dense_id: u32,
    /// Texel that was read
    pub screen_pos: (u32, u32),
    /// Geographic position under the cursor, if the view transform is invertible
    pub geo: Option<GeographicCoordinate>,
}

/// Counters from the last [`HiddenBufferPicker::render_features`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStats {
    pub feature_count: usize,
    pub vertex_count: usize,
    pub index_count: usize,
    pub vertex_capacity: usize,
    pub index_capacity: usize,
}

pub struct HiddenBufferPicker {
    gpu: GpuContext,
    translator: CoordinateTranslator,
    config: PickingConfig,
    pass: IdBufferPass,
    identities: IdentityTable,
    records: BTreeMap<u32, FeatureRecord>,
    by_external_id: HashMap<String, u32>,
    vertex_buffer: Option<wgpu::Buffer>,
    vertex_capacity: usize,
    index_buffer: Option<wgpu::Buffer>,
    index_capacity: usize,
    pick_readback: ReadbackBuffer,
    coverage_readback: ReadbackBuffer,
    view_proj: Mat4,
    last_stats: RenderStats,
}

impl HiddenBufferPicker {
    pub fn new(
        gpu: GpuContext,
        translator: CoordinateTranslator,
        config: PickingConfig,
        width: u32,
        height: u32,
    ) -> Self {
        let pass = IdBufferPass::new(&gpu.device, width, height);
        let pick_readback = ReadbackBuffer::new(
            &gpu.device,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            "geodrape.Picking.PickReadback",
        );
        let coverage_readback = ReadbackBuffer::new(
            &gpu.device,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            "geodrape.Picking.CoverageReadback",
        );
        Self {
            gpu,
            translator,
            config,
            pass,
            identities: IdentityTable::new(),
            records: BTreeMap::new(),
            by_external_id: HashMap::new(),
            vertex_buffer: None,
            vertex_capacity: 0,
            index_buffer: None,
            index_capacity: 0,
            pick_readback,
            coverage_readback,
            view_proj: Mat4::IDENTITY,
            last_stats: RenderStats::default(),
        }
    }

    pub fn translator(&self) -> &CoordinateTranslator {
        &self.translator
    }

    pub fn translator_mut(&mut self) -> &mut CoordinateTranslator {
        &mut self.translator
    }

    pub fn set_view_proj(&mut self, view_proj: Mat4) {
        self.view_proj = view_proj;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pass.dimensions()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.pass.resize(&self.gpu.device, width, height);
    }

    pub fn feature_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, dense_id: u32) -> Option<&FeatureRecord> {
        self.records.get(&dense_id)
    }

    pub fn visible_texture(&self) -> &wgpu::Texture {
        self.pass.visible_texture()
    }

    pub fn hidden_texture(&self) -> &wgpu::Texture {
        self.pass.identity_texture()
    }

    pub fn last_stats(&self) -> RenderStats {
        self.last_stats
    }

    /// Translate, triangulate and register features. Returns the dense ids in
    /// input order. On error nothing from this call is registered. Re-adding
    /// a feature with an existing external id replaces its record.
    pub async fn add_features(&mut self, features: Vec<Feature>) -> RenderResult<Vec<u32>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        for feature in &features {
            feature.geometry.validate()?;
        }
        if !self.identities.can_allocate(features.len()) {
            return Err(RenderError::IdentityExhausted(self.identities.allocated()));
        }

        let mut spans = Vec::with_capacity(features.len());
        let mut coords = Vec::new();
        for feature in &features {
            let start = coords.len();
            coords.extend(feature.geometry.coordinates());
            spans.push(start..coords.len());
        }
        let translated = self.translator.translate_batch(&coords).await?;

        let mut built = Vec::with_capacity(features.len());
        for (feature, span) in features.into_iter().zip(spans) {
            let render_geometry = feature.geometry.with_render_coords(&translated[span]);
            let mesh = triangulate(
                &render_geometry,
                self.config.default_line_width,
                self.config.point_size,
            )?;
            built.push((feature, render_geometry, mesh));
        }

        let mut ids = Vec::with_capacity(built.len());
        for (feature, render_geometry, mesh) in built {
            let (dense_id, identity_color) = self.identities.allocate()?;
            let (vertices, indices) = mesh.into_vertices(feature.style_color(), identity_color.bytes());
            if let Some(previous) = self.by_external_id.insert(feature.key(), dense_id) {
                self.records.remove(&previous);
                self.identities.release(previous);
            }
            self.records.insert(
                dense_id,
                FeatureRecord {
                    feature,
                    render_geometry,
                    vertices,
                    indices,
                    identity_color,
                    dense_id,
                },
            );
            ids.push(dense_id);
        }

        log::debug!("added {} features, {} registered", ids.len(), self.records.len());
        Ok(ids)
    }

    /// Upload all records into the shared buffers and render the visible and
    /// identity targets in one submission.
    pub fn render_features(&mut self) -> RenderResult<RenderStats> {
        let total_vertices: usize = self.records.values().map(|r| r.vertices.len()).sum();
        let total_indices: usize = self.records.values().map(|r| r.indices.len()).sum();

        let mut vertices: Vec<PickVertex> = Vec::with_capacity(total_vertices);
        let mut indices: Vec<u32> = Vec::with_capacity(total_indices);
        for record in self.records.values() {
            let base = vertices.len() as u32;
            vertices.extend_from_slice(&record.vertices);
            indices.extend(record.indices.iter().map(|i| base + i));
        }

        self.ensure_capacity(vertices.len(), indices.len())?;

        let queue = &self.gpu.queue;
        self.pass.update_uniforms(queue, self.view_proj.to_cols_array_2d());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("geodrape.Picking.RenderEncoder"),
            });

        let geometry = match (&self.vertex_buffer, &self.index_buffer) {
            (Some(vb), Some(ib)) if !indices.is_empty() => {
                queue.write_buffer(vb, 0, bytemuck::cast_slice(&vertices));
                queue.write_buffer(ib, 0, bytemuck::cast_slice(&indices));
                Some((vb, ib, indices.len() as u32))
            }
            _ => None,
        };
        self.pass.encode(&mut encoder, geometry);
        queue.submit(Some(encoder.finish()));

        self.last_stats = RenderStats {
            feature_count: self.records.len(),
            vertex_count: vertices.len(),
            index_count: indices.len(),
            vertex_capacity: self.vertex_capacity,
            index_capacity: self.index_capacity,
        };
        Ok(self.last_stats)
    }

    /// Grow the shared buffers geometrically. Failures are fatal to the frame.
    fn ensure_capacity(&mut self, vertex_count: usize, index_count: usize) -> RenderResult<()> {
        let needs_vertices = vertex_count > self.vertex_capacity;
        let needs_indices = index_count > self.index_capacity;
        if !needs_vertices && !needs_indices {
            return Ok(());
        }

        let device = &self.gpu.device;
        let max = device.limits().max_buffer_size;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        if needs_vertices {
            let capacity = vertex_count.max(self.vertex_capacity * 2).max(MIN_VERTEX_CAPACITY);
            let size = (capacity * std::mem::size_of::<PickVertex>()) as u64;
            if size > max {
                let _ = pollster::block_on(device.pop_error_scope());
                return Err(RenderError::device(format!(
                    "vertex buffer of {} bytes exceeds device limit {}",
                    size, max
                )));
            }
            self.vertex_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("geodrape.Picking.VertexBuffer"),
                size,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.vertex_capacity = capacity;
        }

        if needs_indices {
            let capacity = index_count.max(self.index_capacity * 2).max(MIN_INDEX_CAPACITY);
            let size = (capacity * std::mem::size_of::<u32>()) as u64;
            if size > max {
                let _ = pollster::block_on(device.pop_error_scope());
                return Err(RenderError::device(format!(
                    "index buffer of {} bytes exceeds device limit {}",
                    size, max
                )));
            }
            self.index_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("geodrape.Picking.IndexBuffer"),
                size,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.index_capacity = capacity;
        }

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            self.vertex_buffer = None;
            self.index_buffer = None;
            self.vertex_capacity = 0;
            self.index_capacity = 0;
            return Err(RenderError::device(format!("shared buffer growth failed: {}", err)));
        }
        log::debug!(
            "picking buffers grown to {} vertices / {} indices",
            self.vertex_capacity,
            self.index_capacity
        );
        Ok(())
    }

    /// Resolve the feature under device pixel `(x, y)`. Any failure yields `None`.
    pub async fn pick_feature(&mut self, x: f32, y: f32) -> Option<PickResult> {
        let (width, height) = self.pass.dimensions();
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (px, py) = (x.floor() as u32, y.floor() as u32);
        if px >= width || py >= height {
            return None;
        }

        let texel = match self.read_texel(px, py).await {
            Ok(texel) => texel,
            Err(err) => {
                log::warn!("[{}] pick at ({}, {}) failed: {}", err.category(), px, py, err);
                return None;
            }
        };

        let dense_id = self.identities.resolve(texel)?;
        let record = self.records.get(&dense_id)?;
        Some(PickResult {
            feature: record.feature.clone(),
            dense_id,
            screen_pos: (px, py),
            geo: self.screen_to_geo(px, py),
        })
    }

    async fn read_texel(&mut self, px: u32, py: u32) -> RenderResult<[u8; 4]> {
        let device = &self.gpu.device;
        self.pick_readback.settle(device);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("geodrape.Picking.PickCopy"),
        });
        encode_texture_region_copy(
            &mut encoder,
            self.pass.identity_texture(),
            self.pick_readback.buffer(),
            (px, py),
            1,
            1,
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let bytes = self.pick_readback.read(device, 4).await?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Pixel center -> NDC -> render space -> geographic
    fn screen_to_geo(&self, px: u32, py: u32) -> Option<GeographicCoordinate> {
        let (width, height) = self.pass.dimensions();
        let ndc_x = (px as f32 + 0.5) / width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (py as f32 + 0.5) / height as f32 * 2.0;
        let inverse = self.view_proj.inverse();
        let p = inverse * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
        if !p.is_finite() || p.w.abs() < f32::EPSILON {
            return None;
        }
        let render = RenderCoordinate::new(p.x / p.w, p.y / p.w);
        Some(self.translator.untranslate(render))
    }

    /// Count hidden-target pixels per dense id, reading the target back in
    /// row chunks. Background and unmapped colors are skipped.
    pub async fn feature_coverage(&mut self) -> RenderResult<HashMap<u32, u64>> {
        let (width, height) = self.pass.dimensions();
        let chunk_rows = self.config.coverage_chunk_rows.max(1).min(height);
        let row_bytes = width * 4;
        let padded_bpr = align_copy_bpr(row_bytes);
        let device = &self.gpu.device;

        self.coverage_readback
            .ensure_capacity(device, padded_bpr as u64 * chunk_rows as u64);

        let mut coverage = HashMap::new();
        let mut y = 0;
        while y < height {
            let rows = chunk_rows.min(height - y);
            self.coverage_readback.settle(device);

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("geodrape.Picking.CoverageCopy"),
            });
            encode_texture_region_copy(
                &mut encoder,
                self.pass.identity_texture(),
                self.coverage_readback.buffer(),
                (0, y),
                width,
                rows,
            );
            self.gpu.queue.submit(Some(encoder.finish()));

            let padded = self
                .coverage_readback
                .read(device, padded_bpr as u64 * rows as u64)
                .await?;
            let pixels = depad_rows(&padded, row_bytes as usize, padded_bpr as usize, rows as usize);
            for texel in pixels.chunks_exact(4) {
                if let Some(id) = self.identities.resolve([texel[0], texel[1], texel[2], texel[3]]) {
                    *coverage.entry(id).or_insert(0u64) += 1;
                }
            }
            y += rows;
        }
        Ok(coverage)
    }

    /// Drop every record and restart ids at 1
    pub fn clear_features(&mut self) {
        self.records.clear();
        self.by_external_id.clear();
        self.identities.reset();
        log::debug!("picker feature table cleared");
    }
}
