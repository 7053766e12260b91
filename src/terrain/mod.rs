//! Terrain draping: coarse centerlines in, dense terrain-conformant ribbon
//! meshes out, computed entirely on the GPU.

pub mod height;
pub mod manager;
pub mod pipeline;
pub mod reference;
pub mod resources;
pub mod types;

pub use height::{
    decode_height, encode_height, height_to_z, HeightRaster, TerrainBounds, HEIGHT_DIVISOR, MAX_HEIGHT_M,
};
pub use manager::{DrapeBatch, GeoLineRecord, LineRecord, TerrainComputeManager, TileKey};
pub use pipeline::{
    PipelineCapacity, TerrainComputePipeline, TerrainOutput, TerrainPipelineStats, TerrainReadback,
};
pub use resources::{ResourceUpdate, TerrainResources};
pub use types::{DensePoint, DrawTotals, FeatureStyle, OutputVertex, SegmentWork, TerrainSegment};
