// src/picking/feature.rs
// Input features and the per-feature records kept by the picker

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RenderError, RenderResult};
use crate::geo::{GeographicCoordinate, RenderCoordinate};

use super::identity::IdentityColor;
use super::triangulate::PickVertex;

/// GeoJSON-style geometry, `{"type": ..., "coordinates": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    /// Exterior ring first, holes after
    Polygon(Vec<Vec<[f64; 2]>>),
}

impl Geometry {
    /// Structural checks that do not need projection
    pub fn validate(&self) -> RenderResult<()> {
        match self {
            Geometry::Point(_) => Ok(()),
            Geometry::LineString(coords) => {
                if coords.len() < 2 {
                    return Err(RenderError::conversion(format!(
                        "line needs at least 2 points, got {}",
                        coords.len()
                    )));
                }
                Ok(())
            }
            Geometry::Polygon(rings) => {
                if rings.is_empty() {
                    return Err(RenderError::conversion("polygon has no exterior ring"));
                }
                for ring in rings {
                    if open_ring(ring).len() < 3 {
                        return Err(RenderError::conversion(
                            "polygon ring needs at least 3 vertices",
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// All coordinates in ring order
    pub(crate) fn coordinates(&self) -> Vec<GeographicCoordinate> {
        match self {
            Geometry::Point(p) => vec![GeographicCoordinate::from(*p)],
            Geometry::LineString(coords) => coords.iter().map(|c| GeographicCoordinate::from(*c)).collect(),
            Geometry::Polygon(rings) => rings
                .iter()
                .flat_map(|ring| open_ring(ring).iter().map(|c| GeographicCoordinate::from(*c)))
                .collect(),
        }
    }

    /// Rebuild the render-space shape from translated coordinates produced
    /// by [`Geometry::coordinates`]
    pub(crate) fn with_render_coords(&self, coords: &[RenderCoordinate]) -> RenderGeometry {
        match self {
            Geometry::Point(_) => RenderGeometry::Point(coords[0]),
            Geometry::LineString(_) => RenderGeometry::Line(coords.to_vec()),
            Geometry::Polygon(rings) => {
                let mut offset = 0;
                let mut out = Vec::with_capacity(rings.len());
                for ring in rings {
                    let len = open_ring(ring).len();
                    out.push(coords[offset..offset + len].to_vec());
                    offset += len;
                }
                let exterior = out.remove(0);
                RenderGeometry::Polygon { exterior, holes: out }
            }
        }
    }
}

/// Drop an explicit closing vertex
fn open_ring(ring: &[[f64; 2]]) -> &[[f64; 2]] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Externally supplied feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: Value,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(id: impl Into<Value>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            geometry,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Visible fill color: `properties.color` as `[r, g, b, a]` in 0..1, or a
    /// default per geometry kind
    pub fn style_color(&self) -> [f32; 4] {
        if let Some(Value::Array(items)) = self.properties.get("color") {
            let channels: Vec<f32> = items.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect();
            if channels.len() == 4 {
                return [channels[0], channels[1], channels[2], channels[3]];
            }
        }
        match self.geometry {
            Geometry::Point(_) => [0.9, 0.3, 0.2, 1.0],
            Geometry::LineString(_) => [0.2, 0.4, 0.9, 1.0],
            Geometry::Polygon(_) => [0.3, 0.7, 0.4, 0.6],
        }
    }

    /// Key used to detect re-adds of the same external feature
    pub(crate) fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Geometry after translation into render space
#[derive(Debug, Clone, PartialEq)]
pub enum RenderGeometry {
    Point(RenderCoordinate),
    Line(Vec<RenderCoordinate>),
    Polygon {
        exterior: Vec<RenderCoordinate>,
        holes: Vec<Vec<RenderCoordinate>>,
    },
}

/// Everything the picker keeps per added feature
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub feature: Feature,
    pub render_geometry: RenderGeometry,
    pub vertices: Vec<PickVertex>,
    pub indices: Vec<u32>,
    pub identity_color: IdentityColor,
    pub dense_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_geojson_feature() {
        let feature: Feature = serde_json::from_str(
            r#"{
                "type": "Feature",
                "id": 7,
                "geometry": { "type": "Polygon", "coordinates": [
                    [[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]],
                    [[0.25, 0.25], [0.75, 0.25], [0.75, 0.75], [0.25, 0.25]]
                ] },
                "properties": { "name": "park" }
            }"#,
        )
        .unwrap();
        assert_eq!(feature.id, Value::from(7));
        assert_eq!(feature.properties["name"], "park");
        feature.geometry.validate().unwrap();
        // Closing vertices are dropped: 4 + 3
        assert_eq!(feature.geometry.coordinates().len(), 7);
    }

    #[test]
    fn test_short_line_is_rejected() {
        let g = Geometry::LineString(vec![[0.0, 0.0]]);
        assert!(matches!(g.validate(), Err(RenderError::Conversion(_))));
    }

    #[test]
    fn test_polygon_rings_split_back() {
        let g = Geometry::Polygon(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]],
            vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0]],
        ]);
        let coords: Vec<RenderCoordinate> = g
            .coordinates()
            .iter()
            .map(|c| RenderCoordinate::new(c.lng as f32, c.lat as f32))
            .collect();
        match g.with_render_coords(&coords) {
            RenderGeometry::Polygon { exterior, holes } => {
                assert_eq!(exterior.len(), 4);
                assert_eq!(holes.len(), 1);
                assert_eq!(holes[0][2], RenderCoordinate::new(2.0, 2.0));
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_style_color_from_properties() {
        let f = Feature::new("a", Geometry::Point([0.0, 0.0]))
            .with_property("color", serde_json::json!([0.1, 0.2, 0.3, 0.4]));
        assert_eq!(f.style_color(), [0.1, 0.2, 0.3, 0.4]);
    }
}
