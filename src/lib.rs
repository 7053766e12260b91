//! GPU-resident core for geographic vector rendering.
//! Rust: wgpu 0.19. Translates geographic coordinates into a precision-safe
//! render space, picks features through an identity-colored hidden buffer and
//! drapes line ribbons over a terrain raster with compute passes.

pub mod config;
pub mod core;
pub mod error;
pub mod geo;
pub mod gpu;
pub mod picking;
pub mod terrain;

pub use config::{GeodrapeConfig, PickingConfig, TerrainConfig, TranslatorConfig};
pub use error::{RenderError, RenderResult};
pub use geo::{
    CoordinateTranslator, GeographicCoordinate, RenderCoordinate, Transform, TransformUpdate,
    TranslatorMetrics, WorldCoordinate,
};
pub use gpu::GpuContext;
pub use picking::{Feature, Geometry, HiddenBufferPicker, PickResult};
pub use terrain::{
    HeightRaster, LineRecord, ResourceUpdate, TerrainBounds, TerrainComputeManager,
    TerrainComputePipeline, TerrainOutput, TerrainResources, TileKey,
};
