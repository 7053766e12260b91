//! Lifecycle owner for the drape pipeline: per-tile centerlines, visibility
//! scoped execution and terrain resource swaps.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::TerrainConfig;
use crate::error::RenderResult;
use crate::geo::{CoordinateTranslator, GeographicCoordinate};
use crate::gpu::GpuContext;

use super::pipeline::{TerrainComputePipeline, TerrainOutput};
use super::resources::{ResourceUpdate, TerrainResources};
use super::types::{FeatureStyle, TerrainSegment};

/// Slippy-map tile address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

fn default_line_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

/// One centerline in render space. Non-zero z marks pre-extruded geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub feature_id: u64,
    pub positions: Vec<[f32; 3]>,
    #[serde(default = "default_line_color")]
    pub color: [f32; 4],
    /// Ribbon width; `<= 0` falls back to the configured default
    #[serde(default)]
    pub width: f32,
    /// Extra lift above the draped surface, added to the configured offset
    #[serde(default, alias = "depthOffset")]
    pub depth_offset: f32,
}

impl LineRecord {
    pub fn new(feature_id: u64, positions: Vec<[f32; 3]>) -> Self {
        Self {
            feature_id,
            positions,
            color: default_line_color(),
            width: 0.0,
            depth_offset: 0.0,
        }
    }

    pub fn with_style(mut self, color: [f32; 4], width: f32) -> Self {
        self.color = color;
        self.width = width;
        self
    }

    pub fn with_depth_offset(mut self, depth_offset: f32) -> Self {
        self.depth_offset = depth_offset;
        self
    }
}

/// Centerline as decoded from a vector tile, coordinates in `[lng, lat]` degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLineRecord {
    pub feature_id: u64,
    pub coordinates: Vec<[f64; 2]>,
    #[serde(default = "default_line_color")]
    pub color: [f32; 4],
    #[serde(default)]
    pub width: f32,
    #[serde(default, alias = "depthOffset")]
    pub depth_offset: f32,
}

impl GeoLineRecord {
    /// Project into the translator's render space. Positions keep z = 0 so
    /// the line is draped.
    pub fn to_render(&self, translator: &mut CoordinateTranslator) -> RenderResult<LineRecord> {
        let positions = self
            .coordinates
            .iter()
            .map(|&c| {
                translator
                    .translate_one(GeographicCoordinate::from(c))
                    .map(|r| [r.x, r.y, 0.0])
            })
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(LineRecord {
            feature_id: self.feature_id,
            positions,
            color: self.color,
            width: self.width,
            depth_offset: self.depth_offset,
        })
    }
}

/// Flattened input for one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrapeBatch {
    pub coarse: Vec<[f32; 4]>,
    pub segments: Vec<TerrainSegment>,
    pub styles: Vec<FeatureStyle>,
}

impl DrapeBatch {
    /// Union the lines of `visible` tiles in key order. Repeated keys and
    /// lines with fewer than two positions are skipped.
    pub fn from_tiles(tiles: &HashMap<TileKey, Vec<LineRecord>>, visible: &[TileKey], default_width: f32) -> Self {
        let mut batch = Self::default();
        let mut seen = HashSet::new();
        for key in visible {
            if !seen.insert(*key) {
                continue;
            }
            let Some(lines) = tiles.get(key) else {
                continue;
            };
            for line in lines.iter().filter(|l| l.positions.len() >= 2) {
                let style = batch.styles.len() as u32;
                let width = if line.width > 0.0 { line.width } else { default_width };
                batch
                    .styles
                    .push(FeatureStyle::new(line.color, width).with_depth_offset(line.depth_offset));

                let base = batch.coarse.len() as u32;
                batch
                    .coarse
                    .extend(line.positions.iter().map(|&[x, y, z]| [x, y, z, 0.0]));
                for k in 0..line.positions.len() as u32 - 1 {
                    batch.segments.push(TerrainSegment::new(base + k, base + k + 1, style));
                }
            }
        }
        batch
    }
}

pub struct TerrainComputeManager {
    pipeline: TerrainComputePipeline,
    tiles: HashMap<TileKey, Vec<LineRecord>>,
    default_line_width: f32,
}

impl TerrainComputeManager {
    pub fn new(gpu: GpuContext, config: TerrainConfig) -> RenderResult<Self> {
        let default_line_width = config.default_line_width;
        Ok(Self {
            pipeline: TerrainComputePipeline::new(gpu, config)?,
            tiles: HashMap::new(),
            default_line_width,
        })
    }

    pub fn pipeline(&self) -> &TerrainComputePipeline {
        &self.pipeline
    }

    /// Execution stays disabled until terrain resources arrive
    pub fn is_enabled(&self) -> bool {
        self.pipeline.has_terrain()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn line_count(&self) -> usize {
        self.tiles.values().map(Vec::len).sum()
    }

    /// Replace the centerlines owned by `tile`
    pub fn collect_centerlines(&mut self, tile: TileKey, lines: Vec<LineRecord>) {
        log::debug!("tile {}: {} centerlines", tile, lines.len());
        self.tiles.insert(tile, lines);
    }

    /// Project geographic centerlines through `translator` and store them for
    /// `tile`. Nothing is stored when any coordinate is invalid.
    pub fn collect_geographic_centerlines(
        &mut self,
        tile: TileKey,
        lines: &[GeoLineRecord],
        translator: &mut CoordinateTranslator,
    ) -> RenderResult<()> {
        let lines = lines
            .iter()
            .map(|line| line.to_render(translator))
            .collect::<RenderResult<Vec<_>>>()?;
        self.collect_centerlines(tile, lines);
        Ok(())
    }

    pub fn remove_tile_centerlines(&mut self, tile: TileKey) -> bool {
        self.tiles.remove(&tile).is_some()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    pub fn update_terrain_resources(&mut self, resources: TerrainResources) -> ResourceUpdate {
        self.pipeline.update_terrain_resources(resources)
    }

    /// Upload the visible tiles' centerlines and run the pipeline once.
    pub fn execute(&mut self, visible: &[TileKey]) -> Option<TerrainOutput> {
        if !self.is_enabled() {
            return None;
        }
        let batch = DrapeBatch::from_tiles(&self.tiles, visible, self.default_line_width);
        if batch.segments.is_empty() {
            return None;
        }
        self.pipeline.upload(&batch.coarse, &batch.segments, &batch.styles);
        self.pipeline.execute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: u64, n: usize) -> LineRecord {
        LineRecord::new(id, (0..n).map(|i| [i as f32 * 0.1, 0.0, 0.0]).collect())
    }

    #[test]
    fn test_batch_unions_visible_tiles_only() {
        let a = TileKey::new(10, 1, 1);
        let b = TileKey::new(10, 2, 1);
        let hidden = TileKey::new(10, 3, 1);
        let mut tiles = HashMap::new();
        tiles.insert(a, vec![line(1, 3)]);
        tiles.insert(b, vec![line(2, 2), line(3, 1)]);
        tiles.insert(hidden, vec![line(4, 5)]);

        let batch = DrapeBatch::from_tiles(&tiles, &[b, a, b], 0.5);
        // b first, a second, repeated b ignored, single-point line skipped
        assert_eq!(batch.styles.len(), 2);
        assert_eq!(batch.coarse.len(), 5);
        assert_eq!(
            batch.segments,
            vec![
                TerrainSegment::new(0, 1, 0),
                TerrainSegment::new(2, 3, 1),
                TerrainSegment::new(3, 4, 1),
            ]
        );
    }

    #[test]
    fn test_batch_width_fallback() {
        let key = TileKey::new(0, 0, 0);
        let mut tiles = HashMap::new();
        tiles.insert(
            key,
            vec![
                line(1, 2),
                line(2, 2).with_style([0.0, 1.0, 0.0, 1.0], 0.2),
            ],
        );
        let batch = DrapeBatch::from_tiles(&tiles, &[key], 0.5);
        assert_eq!(batch.styles[0].half_width, 0.25);
        assert_eq!(batch.styles[1].half_width, 0.1);
        assert_eq!(batch.styles[1].color, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_line_record_json_defaults() {
        let line: LineRecord =
            serde_json::from_str(r#"{ "feature_id": 9, "positions": [[0, 0, 0], [1, 0, 0]] }"#).unwrap();
        assert_eq!(line.color, [1.0; 4]);
        assert_eq!(line.width, 0.0);
        assert_eq!(line.depth_offset, 0.0);
        assert_eq!(TileKey::new(3, 4, 5).to_string(), "3/4/5");
    }

    #[test]
    fn test_batch_carries_depth_offset() {
        let key = TileKey::new(0, 0, 0);
        let mut tiles = HashMap::new();
        tiles.insert(key, vec![line(1, 2), line(2, 2).with_depth_offset(2e-6)]);
        let batch = DrapeBatch::from_tiles(&tiles, &[key], 0.5);
        assert_eq!(batch.styles[0].depth_offset, 0.0);
        assert_eq!(batch.styles[1].depth_offset, 2e-6);
    }

    #[test]
    fn test_geographic_record_projects_through_translator() {
        let config = crate::config::TranslatorConfig {
            initial_center: [8.5, 47.4],
            ..Default::default()
        };
        let mut translator = CoordinateTranslator::new(config, None);
        let record: GeoLineRecord = serde_json::from_str(
            r#"{
                "feature_id": 3,
                "coordinates": [[8.5, 47.4], [8.6, 47.45]],
                "width": 0.002,
                "depthOffset": 1e-6
            }"#,
        )
        .unwrap();
        let line = record.to_render(&mut translator).unwrap();
        assert_eq!(line.depth_offset, 1e-6);
        assert_eq!(line.width, 0.002);
        assert_eq!(line.positions[0], [0.0, 0.0, 0.0]);
        // east and north of the reference
        assert!(line.positions[1][0] > 0.0 && line.positions[1][1] > 0.0);

        let bad = GeoLineRecord {
            coordinates: vec![[8.5, 47.4], [8.5, 95.0]],
            ..record
        };
        assert!(bad.to_render(&mut translator).is_err());
    }
}
