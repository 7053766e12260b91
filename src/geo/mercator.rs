// src/geo/mercator.rs
// Web-Mercator projection between geographic, world and render space

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Latitude limit of the square Web-Mercator world
pub const MAX_LATITUDE: f64 = 85.0511;

/// Longitude/latitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicCoordinate {
    pub lng: f64,
    pub lat: f64,
}

impl GeographicCoordinate {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Reject non-finite or out-of-range coordinates
    pub fn validate(&self) -> RenderResult<()> {
        if !self.lng.is_finite() || !self.lat.is_finite() {
            return Err(RenderError::conversion(format!(
                "non-finite coordinate ({}, {})",
                self.lng, self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) || !(-90.0..=90.0).contains(&self.lat) {
            return Err(RenderError::conversion(format!(
                "coordinate out of range ({}, {})",
                self.lng, self.lat
            )));
        }
        Ok(())
    }
}

impl From<[f64; 2]> for GeographicCoordinate {
    fn from(v: [f64; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

/// Normalized Mercator position, x east and y south, both in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldCoordinate {
    pub x: f64,
    pub y: f64,
}

/// Position relative to the reference point, scaled by 2^zoom, y north
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderCoordinate {
    pub x: f32,
    pub y: f32,
}

impl RenderCoordinate {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Latitude restricted to the square Mercator world
#[inline]
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

/// Mercator world y for a latitude, clamped to the square world
#[inline]
pub fn lat_to_world_y(lat: f64) -> f64 {
    let lat = clamp_latitude(lat).to_radians();
    let merc = (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    0.5 - merc / (2.0 * std::f64::consts::PI)
}

#[inline]
pub fn lng_to_world_x(lng: f64) -> f64 {
    (lng + 180.0) / 360.0
}

/// Project a geographic coordinate into world space
pub fn geo_to_world(geo: GeographicCoordinate) -> WorldCoordinate {
    WorldCoordinate {
        x: lng_to_world_x(geo.lng),
        y: lat_to_world_y(geo.lat),
    }
}

/// Inverse projection
pub fn world_to_geo(world: WorldCoordinate) -> GeographicCoordinate {
    let lng = world.x * 360.0 - 180.0;
    let merc = (0.5 - world.y) * 2.0 * std::f64::consts::PI;
    let lat = (2.0 * merc.exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    GeographicCoordinate { lng, lat }
}

/// Map a world coordinate into render space around `reference`
#[inline]
pub fn world_to_render(world: WorldCoordinate, reference: WorldCoordinate, zoom: f64) -> RenderCoordinate {
    let scale = zoom.exp2();
    RenderCoordinate {
        x: ((world.x - reference.x) * scale) as f32,
        y: ((reference.y - world.y) * scale) as f32,
    }
}

/// Inverse of [`world_to_render`]
#[inline]
pub fn render_to_world(render: RenderCoordinate, reference: WorldCoordinate, zoom: f64) -> WorldCoordinate {
    let scale = zoom.exp2();
    WorldCoordinate {
        x: reference.x + render.x as f64 / scale,
        y: reference.y - render.y as f64 / scale,
    }
}
