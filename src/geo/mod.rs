// src/geo/mod.rs
// Geographic coordinate handling: projection, caching and batch translation

pub mod batch;
pub mod cache;
pub mod mercator;
pub mod translator;

pub use mercator::{
    geo_to_world, world_to_geo, GeographicCoordinate, RenderCoordinate, WorldCoordinate,
    MAX_LATITUDE,
};
pub use translator::{
    CoordinateTranslator, ReferencePoint, Transform, TransformUpdate, TranslatorMetrics,
};
