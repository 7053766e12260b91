// src/picking/triangulate.rs
// Render-space triangulation for picking geometry: polygon fill, line ribbons and point quads

use glam::Vec2;
use lyon_path::math::Point;
use lyon_path::Path;
use lyon_tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};

use crate::error::{RenderError, RenderResult};
use crate::geo::RenderCoordinate;

use super::feature::RenderGeometry;

pub(crate) const EPSILON: f32 = 1e-9;

/// Depth per geometry kind so points draw over lines over polygons
pub const POLYGON_DEPTH: f32 = 0.5;
pub const LINE_DEPTH: f32 = 0.4;
pub const POINT_DEPTH: f32 = 0.3;

/// Shared vertex stream for the visible and the hidden pass
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PickVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub identity: [u8; 4],
}

impl PickVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PickVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 28,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Unorm8x4,
                },
            ],
        }
    }
}

/// Triangle mesh in render space, before identity/color are attached
#[derive(Debug, Clone, Default)]
pub struct Mesh2d {
    pub positions: Vec<Vec2>,
    pub indices: Vec<u32>,
    pub depth: f32,
}

impl Mesh2d {
    pub fn into_vertices(self, color: [f32; 4], identity: [u8; 4]) -> (Vec<PickVertex>, Vec<u32>) {
        let depth = self.depth;
        let vertices = self
            .positions
            .into_iter()
            .map(|p| PickVertex {
                position: [p.x, p.y, depth],
                color,
                identity,
            })
            .collect();
        (vertices, self.indices)
    }
}

/// Triangulate any render geometry
pub fn triangulate(geometry: &RenderGeometry, line_width: f32, point_size: f32) -> RenderResult<Mesh2d> {
    match geometry {
        RenderGeometry::Point(p) => Ok(point_quad(*p, point_size)),
        RenderGeometry::Line(coords) => line_ribbon(coords, line_width),
        RenderGeometry::Polygon { exterior, holes } => fill_polygon(exterior, holes),
    }
}

fn to_vec2(c: &RenderCoordinate) -> Vec2 {
    Vec2::new(c.x, c.y)
}

/// Axis-aligned quad of edge `size` centered on the point
pub fn point_quad(center: RenderCoordinate, size: f32) -> Mesh2d {
    let c = to_vec2(&center);
    let h = size * 0.5;
    Mesh2d {
        positions: vec![
            c + Vec2::new(-h, -h),
            c + Vec2::new(h, -h),
            c + Vec2::new(h, h),
            c + Vec2::new(-h, h),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        depth: POINT_DEPTH,
    }
}

/// Quad-strip ribbon offset by half `width` along the local perpendicular.
/// Interior joins use the averaged perpendicular with the miter length
/// capped at twice the half width.
pub fn line_ribbon(coords: &[RenderCoordinate], width: f32) -> RenderResult<Mesh2d> {
    let mut path: Vec<Vec2> = Vec::with_capacity(coords.len());
    for c in coords {
        let p = to_vec2(c);
        if path.last().map_or(true, |last| (p - *last).length() > EPSILON) {
            path.push(p);
        }
    }
    if path.len() < 2 {
        return Err(RenderError::conversion(
            "line collapses to a single point in render space",
        ));
    }

    let half = width * 0.5;
    let n = path.len();
    let mut positions = Vec::with_capacity(n * 2);
    for i in 0..n {
        let dir_in = if i > 0 { (path[i] - path[i - 1]).normalize() } else { Vec2::ZERO };
        let dir_out = if i + 1 < n { (path[i + 1] - path[i]).normalize() } else { Vec2::ZERO };
        let tangent = (dir_in + dir_out).normalize_or_zero();
        let tangent = if tangent == Vec2::ZERO { dir_out } else { tangent };
        let perp = tangent.perp();
        let reference = if i + 1 < n { dir_out.perp() } else { dir_in.perp() };
        let cos = perp.dot(reference).abs().max(0.5);
        let offset = perp * (half / cos);
        positions.push(path[i] + offset);
        positions.push(path[i] - offset);
    }

    let mut indices = Vec::with_capacity((n - 1) * 6);
    for i in 0..(n as u32 - 1) {
        let l0 = 2 * i;
        indices.extend_from_slice(&[l0, l0 + 1, l0 + 2, l0 + 1, l0 + 3, l0 + 2]);
    }

    Ok(Mesh2d {
        positions,
        indices,
        depth: LINE_DEPTH,
    })
}

/// Fill tessellation with holes (even-odd)
pub fn fill_polygon(exterior: &[RenderCoordinate], holes: &[Vec<RenderCoordinate>]) -> RenderResult<Mesh2d> {
    if exterior.len() < 3 {
        return Err(RenderError::conversion(
            "Polygon exterior must have at least 3 vertices",
        ));
    }

    let mut builder = Path::builder();
    for ring in std::iter::once(exterior).chain(holes.iter().map(|h| h.as_slice())) {
        if ring.len() < 3 {
            return Err(RenderError::conversion("Polygon hole must have at least 3 vertices"));
        }
        builder.begin(Point::new(ring[0].x, ring[0].y));
        for v in ring.iter().skip(1) {
            builder.line_to(Point::new(v.x, v.y));
        }
        builder.close();
    }
    let path = builder.build();

    let mut buffers: VertexBuffers<Vec2, u32> = VertexBuffers::new();
    let mut tessellator = FillTessellator::new();
    tessellator
        .tessellate_path(
            &path,
            &FillOptions::default(),
            &mut BuffersBuilder::new(&mut buffers, |vertex: FillVertex| {
                Vec2::new(vertex.position().x, vertex.position().y)
            }),
        )
        .map_err(|e| RenderError::conversion(format!("Polygon tessellation failed: {:?}", e)))?;

    if buffers.indices.is_empty() {
        return Err(RenderError::conversion("Polygon tessellation produced no triangles"));
    }

    Ok(Mesh2d {
        positions: buffers.vertices,
        indices: buffers.indices,
        depth: POLYGON_DEPTH,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signed area of a triangle, positive when counter-clockwise
    fn triangle_area(a: Vec2, b: Vec2, c: Vec2) -> f32 {
        0.5 * (b - a).perp_dot(c - a)
    }

    fn rc(x: f32, y: f32) -> RenderCoordinate {
        RenderCoordinate::new(x, y)
    }

    #[test]
    fn test_point_quad_is_two_triangles() {
        let mesh = point_quad(rc(1.0, 1.0), 0.2);
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!((mesh.positions[2] - Vec2::new(1.1, 1.1)).length() < 1e-6);
    }

    #[test]
    fn test_ribbon_winding_and_width() {
        let mesh = line_ribbon(&[rc(0.0, 0.0), rc(1.0, 0.0), rc(2.0, 0.0)], 0.2).unwrap();
        assert_eq!(mesh.positions.len(), 6);
        assert_eq!(mesh.indices.len(), 12);
        assert!((mesh.positions[0].y - 0.1).abs() < 1e-6);
        assert!((mesh.positions[1].y + 0.1).abs() < 1e-6);
        for tri in mesh.indices.chunks(3) {
            let area = triangle_area(
                mesh.positions[tri[0] as usize],
                mesh.positions[tri[1] as usize],
                mesh.positions[tri[2] as usize],
            );
            assert!(area > 0.0);
        }
    }

    #[test]
    fn test_ribbon_drops_duplicate_points() {
        let mesh = line_ribbon(&[rc(0.0, 0.0), rc(0.0, 0.0), rc(0.0, 1.0)], 0.1).unwrap();
        assert_eq!(mesh.positions.len(), 4);
        assert!(line_ribbon(&[rc(0.5, 0.5), rc(0.5, 0.5)], 0.1).is_err());
    }

    #[test]
    fn test_polygon_with_hole() {
        let exterior = vec![rc(-2.0, -2.0), rc(2.0, -2.0), rc(2.0, 2.0), rc(-2.0, 2.0)];
        let hole = vec![rc(-0.5, -0.5), rc(0.5, -0.5), rc(0.5, 0.5), rc(-0.5, 0.5)];
        let mesh = fill_polygon(&exterior, &[hole]).unwrap();
        assert!(mesh.positions.len() > 4);
        assert_eq!(mesh.indices.len() % 3, 0);

        // No triangle covers the hole center.
        let center = Vec2::ZERO;
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| mesh.positions[i as usize]);
            let s = triangle_area(a, b, c).signum();
            let inside = triangle_area(a, b, center) * s > 0.0
                && triangle_area(b, c, center) * s > 0.0
                && triangle_area(c, a, center) * s > 0.0;
            assert!(!inside);
        }
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let err = fill_polygon(&[rc(0.0, 0.0), rc(1.0, 0.0)], &[]).unwrap_err();
        assert!(err.to_string().contains("at least 3 vertices"));
    }
}
