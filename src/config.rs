//! Configuration surface for the translator, the picker and the terrain
//! pipeline. Every section deserializes with defaults so partial JSON
//! documents are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::terrain::PipelineCapacity;

/// Upper bound on `terrain.max_subdivision_factor`
pub const MAX_SUBDIVISION_FACTOR: u32 = 1024;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeodrapeConfig {
    pub translator: TranslatorConfig,
    pub picking: PickingConfig,
    pub terrain: TerrainConfig,
}

/// Coordinate translation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Maximum number of cached translations
    pub cache_size: usize,
    /// Minimum batch length that goes through the compute path
    pub batch_threshold: usize,
    /// Whether the compute path may be used at all
    pub parallel_compute: bool,
    /// Center drift in degrees that triggers a new reference point
    pub precision_threshold: f64,
    /// Initial view center as [lng, lat]
    pub initial_center: [f64; 2],
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            cache_size: 10_000,
            batch_threshold: 1_024,
            parallel_compute: true,
            precision_threshold: 0.01,
            initial_center: [0.0, 0.0],
        }
    }
}

/// Hidden-buffer picking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickingConfig {
    /// Ribbon width for line features, in render units
    pub default_line_width: f32,
    /// Edge length of the quad emitted for point features, in render units
    pub point_size: f32,
    /// Rows per readback chunk when aggregating coverage
    pub coverage_chunk_rows: u32,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            default_line_width: 0.01,
            point_size: 0.02,
            coverage_chunk_rows: 64,
        }
    }
}

/// Terrain compute settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Upper bound on sub-segments per coarse segment
    pub max_subdivision_factor: u32,
    /// Height variation in meters above which a segment is subdivided
    pub gradient_threshold: f32,
    /// Ribbon width used when a line record carries none
    pub default_line_width: f32,
    /// Constant lift added to every draped vertex
    pub depth_offset: f32,
    /// Vertical exaggeration applied to decoded heights
    pub exaggeration: f32,
    /// Segment capacity of the fixed-size GPU buffers
    pub max_segments: u32,
    /// Coarse vertex capacity of the fixed-size GPU buffers
    pub max_coarse_vertices: u32,
    /// |z| above which a vertex counts as pre-extruded
    pub z_epsilon: f32,
    /// Margin in UV units around the raster bounds
    pub bounds_margin: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            max_subdivision_factor: 16,
            gradient_threshold: 10.0,
            default_line_width: 0.0005,
            depth_offset: 0.0,
            exaggeration: 1.0,
            max_segments: 16_384,
            max_coarse_vertices: 32_768,
            z_epsilon: 1e-6,
            bounds_margin: 0.01,
        }
    }
}

impl GeodrapeConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_path<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values the pipelines cannot work with
    pub fn validate(&self) -> RenderResult<()> {
        let t = &self.translator;
        if t.cache_size == 0 {
            return Err(RenderError::config("translator.cache_size must be > 0"));
        }
        if !(t.precision_threshold.is_finite() && t.precision_threshold >= 0.0) {
            return Err(RenderError::config(
                "translator.precision_threshold must be finite and >= 0",
            ));
        }
        let [lng, lat] = t.initial_center;
        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            return Err(RenderError::config(format!(
                "translator.initial_center out of range: [{}, {}]",
                lng, lat
            )));
        }

        let p = &self.picking;
        if !(p.default_line_width > 0.0 && p.point_size > 0.0) {
            return Err(RenderError::config(
                "picking.default_line_width and picking.point_size must be > 0",
            ));
        }
        if p.coverage_chunk_rows == 0 {
            return Err(RenderError::config("picking.coverage_chunk_rows must be > 0"));
        }

        let g = &self.terrain;
        if g.max_subdivision_factor == 0 {
            return Err(RenderError::config("terrain.max_subdivision_factor must be >= 1"));
        }
        if !(g.gradient_threshold > 0.0) {
            return Err(RenderError::config("terrain.gradient_threshold must be > 0"));
        }
        if g.max_subdivision_factor > MAX_SUBDIVISION_FACTOR {
            return Err(RenderError::config(format!(
                "terrain.max_subdivision_factor must be <= {}",
                MAX_SUBDIVISION_FACTOR
            )));
        }
        if g.max_segments == 0 || g.max_coarse_vertices < 2 {
            return Err(RenderError::config(
                "terrain.max_segments must be > 0 and terrain.max_coarse_vertices >= 2",
            ));
        }
        PipelineCapacity::from_config(g)?;
        if !g.exaggeration.is_finite() || g.exaggeration < 0.0 {
            return Err(RenderError::config("terrain.exaggeration must be finite and >= 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        GeodrapeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = GeodrapeConfig::from_json_str(
            r#"{ "translator": { "cache_size": 8 }, "terrain": { "exaggeration": 2.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.translator.cache_size, 8);
        assert_eq!(config.translator.batch_threshold, 1_024);
        assert_eq!(config.terrain.exaggeration, 2.5);
        assert_eq!(config.terrain.max_subdivision_factor, 16);
    }

    #[test]
    fn test_rejects_zero_subdivision() {
        let err = GeodrapeConfig::from_json_str(r#"{ "terrain": { "max_subdivision_factor": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_rejects_capacity_overflow() {
        let err = GeodrapeConfig::from_json_str(
            r#"{ "terrain": { "max_segments": 1000000000, "max_subdivision_factor": 64 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));

        let err = GeodrapeConfig::from_json_str(r#"{ "terrain": { "max_subdivision_factor": 5000 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("max_subdivision_factor"));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = GeodrapeConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }
}
