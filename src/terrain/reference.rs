//! CPU rendition of the five compute passes. Produces the same buffers the
//! shaders write and serves as their ground truth in tests.

use glam::{Vec2, Vec3};

use crate::config::TerrainConfig;

use super::height::{height_to_z, HeightRaster, TerrainBounds, MAX_HEIGHT_M};
use super::types::{DensePoint, DrawTotals, FeatureStyle, OutputVertex, SegmentWork, TerrainSegment};

const MITER_LIMIT: f32 = 2.0;

/// Everything the pipeline leaves in its buffers after one run
#[derive(Debug, Clone, Default)]
pub struct ReferenceOutput {
    pub work: Vec<SegmentWork>,
    pub points: Vec<DensePoint>,
    pub vertices: Vec<OutputVertex>,
    pub indices: Vec<u32>,
    pub totals: DrawTotals,
}

/// Sub-segment count for a height variation in meters
pub fn subdivision_count(variation: f32, gradient_threshold: f32, max_factor: u32) -> u32 {
    let max_factor = max_factor.max(1);
    if variation <= gradient_threshold {
        return 1;
    }
    let wanted = (variation / gradient_threshold).ceil() as u32;
    wanted.max(2).min(max_factor)
}

/// Exclusive prefix sum; also returns the total
pub fn exclusive_prefix_sum(values: &[u32]) -> (Vec<u32>, u32) {
    let mut running = 0u32;
    let offsets = values
        .iter()
        .map(|v| {
            let offset = running;
            running += v;
            offset
        })
        .collect();
    (offsets, running)
}

/// Pass 1
pub fn count_pass(
    raster: &HeightRaster,
    bounds: &TerrainBounds,
    coarse: &[[f32; 4]],
    segments: &[TerrainSegment],
    config: &TerrainConfig,
) -> Vec<u32> {
    segments
        .iter()
        .map(|seg| {
            let a = Vec2::new(coarse[seg.start_vertex as usize][0], coarse[seg.start_vertex as usize][1]);
            let b = Vec2::new(coarse[seg.end_vertex as usize][0], coarse[seg.end_vertex as usize][1]);
            let samples: Vec<f32> = [a, (a + b) * 0.5, b]
                .iter()
                .map(|p| bounds.to_uv(p.to_array()))
                .filter(|uv| TerrainBounds::contains_uv(*uv, config.bounds_margin))
                .map(|uv| raster.sample(uv))
                .collect();
            if samples.len() < 2 {
                return 1;
            }
            let lo = samples.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            subdivision_count(hi - lo, config.gradient_threshold, config.max_subdivision_factor)
        })
        .collect()
}

/// Pass 3
pub fn subdivide_pass(coarse: &[[f32; 4]], segments: &[TerrainSegment], work: &[SegmentWork], total_points: u32) -> Vec<DensePoint> {
    let mut points = vec![
        DensePoint {
            position: [0.0; 3],
            segment: 0,
        };
        total_points as usize
    ];
    for (s, (seg, w)) in segments.iter().zip(work).enumerate() {
        let a = Vec3::from_slice(&coarse[seg.start_vertex as usize][..3]);
        let b = Vec3::from_slice(&coarse[seg.end_vertex as usize][..3]);
        let base = (w.offset + s as u32) as usize;
        for i in 0..=w.count {
            let t = i as f32 / w.count as f32;
            points[base + i as usize] = DensePoint {
                position: (a * (1.0 - t) + b * t).to_array(),
                segment: s as u32,
            };
        }
    }
    points
}

fn segment_dir(coarse: &[[f32; 4]], seg: &TerrainSegment) -> Vec2 {
    let a = Vec2::new(coarse[seg.start_vertex as usize][0], coarse[seg.start_vertex as usize][1]);
    let b = Vec2::new(coarse[seg.end_vertex as usize][0], coarse[seg.end_vertex as usize][1]);
    let d = b - a;
    let len = d.length();
    if len < 1e-12 {
        Vec2::X
    } else {
        d / len
    }
}

fn joined(dir: Vec2, other: Vec2) -> Vec2 {
    let sum = dir + other;
    if sum.length() < 1e-6 {
        dir
    } else {
        sum.normalize()
    }
}

/// Pass 4
pub fn mesh_pass(
    coarse: &[[f32; 4]],
    segments: &[TerrainSegment],
    styles: &[FeatureStyle],
    work: &[SegmentWork],
    points: &[DensePoint],
    totals: &DrawTotals,
) -> (Vec<OutputVertex>, Vec<u32>) {
    let mut vertices = vec![
        OutputVertex {
            position: [0.0; 4],
            normal: [0.0; 4],
            color: [0.0; 4],
        };
        totals.vertex_count as usize
    ];
    let mut indices = vec![0u32; totals.index_count as usize];

    for (i, point) in points.iter().enumerate() {
        let i = i as u32;
        let s = point.segment as usize;
        let seg = &segments[s];
        let w = work[s];
        let local = i - (w.offset + s as u32);

        let dir = segment_dir(coarse, seg);
        let mut tangent = dir;
        if local == 0 && s > 0 {
            let prev = &segments[s - 1];
            if prev.feature_index == seg.feature_index && prev.end_vertex == seg.start_vertex {
                tangent = joined(dir, segment_dir(coarse, prev));
            }
        }
        if local == w.count && s + 1 < segments.len() {
            let next = &segments[s + 1];
            if next.feature_index == seg.feature_index && next.start_vertex == seg.end_vertex {
                tangent = joined(dir, segment_dir(coarse, next));
            }
        }

        let normal = dir.perp();
        let miter = tangent.perp();
        let scale = (1.0 / miter.dot(normal).max(1e-6)).min(MITER_LIMIT);
        let style = &styles[seg.feature_index as usize];
        let offset = miter * style.half_width * scale;

        let [x, y, z] = point.position;
        let center = Vec2::new(x, y);
        let left = center + offset;
        let right = center - offset;
        vertices[(2 * i) as usize] = OutputVertex {
            position: [left.x, left.y, z, 1.0],
            normal: [0.0, 0.0, 1.0, 0.0],
            color: style.color,
        };
        vertices[(2 * i + 1) as usize] = OutputVertex {
            position: [right.x, right.y, z, 1.0],
            normal: [0.0, 0.0, 1.0, 0.0],
            color: style.color,
        };

        if local < w.count {
            let base = (6 * (i - s as u32)) as usize;
            let v = 2 * i;
            indices[base..base + 6].copy_from_slice(&[v, v + 1, v + 2, v + 1, v + 3, v + 2]);
        }
    }
    (vertices, indices)
}

/// Pass 5. Vertex `v` belongs to dense point `v / 2`, whose segment picks the
/// style and with it the per-feature depth offset.
pub fn drape_pass(
    raster: &HeightRaster,
    bounds: &TerrainBounds,
    config: &TerrainConfig,
    points: &[DensePoint],
    segments: &[TerrainSegment],
    styles: &[FeatureStyle],
    vertices: &mut [OutputVertex],
) {
    for (v, vertex) in vertices.iter_mut().enumerate() {
        if vertex.position[2].abs() > config.z_epsilon {
            continue;
        }
        let uv = bounds.to_uv([vertex.position[0], vertex.position[1]]);
        if !TerrainBounds::contains_uv(uv, config.bounds_margin) {
            continue;
        }
        let segment = &segments[points[v / 2].segment as usize];
        let lift = config.depth_offset + styles[segment.feature_index as usize].depth_offset;
        let h = raster.sample(uv).clamp(0.0, MAX_HEIGHT_M);
        vertex.position[2] = height_to_z(h, config.exaggeration, lift);
        let [nx, ny, nz] = raster.normal(uv, bounds, config.exaggeration);
        vertex.normal = [nx, ny, nz, 0.0];
    }
}

/// All five passes in order
pub fn run(
    raster: &HeightRaster,
    bounds: &TerrainBounds,
    config: &TerrainConfig,
    coarse: &[[f32; 4]],
    segments: &[TerrainSegment],
    styles: &[FeatureStyle],
) -> ReferenceOutput {
    if segments.is_empty() {
        return ReferenceOutput::default();
    }
    let counts = count_pass(raster, bounds, coarse, segments, config);
    let (offsets, total) = exclusive_prefix_sum(&counts);
    let work: Vec<SegmentWork> = counts
        .iter()
        .zip(&offsets)
        .map(|(&count, &offset)| SegmentWork { count, offset })
        .collect();
    let totals = DrawTotals::from_sum(total, segments.len() as u32);

    let points = subdivide_pass(coarse, segments, &work, totals.point_count);
    let (mut vertices, indices) = mesh_pass(coarse, segments, styles, &work, &points, &totals);
    drape_pass(raster, bounds, config, &points, segments, styles, &mut vertices);

    ReferenceOutput {
        work,
        points,
        vertices,
        indices,
        totals,
    }
}

/// Signed area of a triangle in the xy plane; positive when counter-clockwise
pub fn signed_area(a: [f32; 4], b: [f32; 4], c: [f32; 4]) -> f32 {
    0.5 * ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]))
}
