//! GPU-visible layouts shared by the compute passes and the CPU reference.
//! Field order and padding mirror the WGSL structs in `pipeline::shader`.

use bytemuck::{Pod, Zeroable};

use crate::config::TerrainConfig;

use super::height::TerrainBounds;

/// Coarse segment over the shared vertex array
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TerrainSegment {
    pub start_vertex: u32,
    pub end_vertex: u32,
    /// Index into the per-feature style table
    pub feature_index: u32,
    pub _pad: u32,
}

impl TerrainSegment {
    pub fn new(start_vertex: u32, end_vertex: u32, feature_index: u32) -> Self {
        Self {
            start_vertex,
            end_vertex,
            feature_index,
            _pad: 0,
        }
    }
}

/// Per-feature ribbon style
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FeatureStyle {
    pub color: [f32; 4],
    pub half_width: f32,
    /// Lift added on top of the configured depth offset when draping
    pub depth_offset: f32,
    pub _pad: [f32; 2],
}

impl FeatureStyle {
    pub fn new(color: [f32; 4], width: f32) -> Self {
        Self {
            color,
            half_width: width * 0.5,
            depth_offset: 0.0,
            _pad: [0.0; 2],
        }
    }

    pub fn with_depth_offset(mut self, depth_offset: f32) -> Self {
        self.depth_offset = depth_offset;
        self
    }
}

/// Count and exclusive offset of one segment
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SegmentWork {
    pub count: u32,
    pub offset: u32,
}

/// Subdivided point tagged with its segment
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DensePoint {
    pub position: [f32; 3],
    pub segment: u32,
}

/// Ribbon vertex. `w` components are padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct OutputVertex {
    pub position: [f32; 4],
    pub normal: [f32; 4],
    pub color: [f32; 4],
}

impl OutputVertex {
    pub fn position(&self) -> [f32; 3] {
        [self.position[0], self.position[1], self.position[2]]
    }

    pub fn normal(&self) -> [f32; 3] {
        [self.normal[0], self.normal[1], self.normal[2]]
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4, 2 => Float32x4];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<OutputVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// `DrawIndexedIndirect` arguments followed by the pass totals
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawTotals {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
    /// Dense points written by the subdivide pass
    pub point_count: u32,
    /// Ribbon vertices, two per dense point
    pub vertex_count: u32,
    /// Sum of all subdivision counts
    pub subdivision_count: u32,
}

impl DrawTotals {
    /// Totals implied by the sum of counts over `segment_count` segments
    pub fn from_sum(subdivisions: u32, segment_count: u32) -> Self {
        let points = subdivisions + segment_count;
        Self {
            index_count: subdivisions * 6,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
            point_count: points,
            vertex_count: points * 2,
            subdivision_count: subdivisions,
        }
    }
}

/// Uniform block for every pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrapeParams {
    pub bounds_min: [f32; 2],
    pub bounds_max: [f32; 2],
    pub segment_count: u32,
    pub max_subdivision: u32,
    pub gradient_threshold: f32,
    pub exaggeration: f32,
    pub depth_offset: f32,
    pub z_epsilon: f32,
    pub bounds_margin: f32,
    pub _pad: f32,
}

impl DrapeParams {
    pub fn new(config: &TerrainConfig, bounds: &TerrainBounds, segment_count: u32) -> Self {
        Self {
            bounds_min: bounds.min,
            bounds_max: bounds.max,
            segment_count,
            max_subdivision: config.max_subdivision_factor.max(1),
            gradient_threshold: config.gradient_threshold,
            exaggeration: config.exaggeration,
            depth_offset: config.depth_offset,
            z_epsilon: config.z_epsilon,
            bounds_margin: config.bounds_margin,
            _pad: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<TerrainSegment>(), 16);
        assert_eq!(std::mem::size_of::<FeatureStyle>(), 32);
        assert_eq!(std::mem::size_of::<SegmentWork>(), 8);
        assert_eq!(std::mem::size_of::<DensePoint>(), 16);
        assert_eq!(std::mem::size_of::<OutputVertex>(), 48);
        assert_eq!(std::mem::size_of::<DrawTotals>(), 32);
        assert_eq!(std::mem::size_of::<DrapeParams>(), 48);
    }

    #[test]
    fn test_totals_from_sum() {
        let t = DrawTotals::from_sum(5, 2);
        assert_eq!(t.index_count, 30);
        assert_eq!(t.point_count, 7);
        assert_eq!(t.vertex_count, 14);
        assert_eq!(t.instance_count, 1);
    }
}
