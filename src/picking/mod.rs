// src/picking/mod.rs
// Hidden-buffer feature picking: identity colors, triangulation, dual-target render and readback

mod feature;
mod id_buffer;
mod identity;
mod picker;
mod triangulate;

pub use feature::{Feature, FeatureRecord, Geometry, RenderGeometry};
pub use id_buffer::{IdBufferPass, IdBufferUniforms, DEPTH_FORMAT, IDENTITY_FORMAT, VISIBLE_FORMAT};
pub use identity::{IdentityColor, IdentityTable, MAX_IDENTITY, NO_FEATURE};
pub use picker::{HiddenBufferPicker, PickResult, RenderStats};
pub use triangulate::{
    fill_polygon, line_ribbon, point_quad, triangulate, Mesh2d, PickVertex, LINE_DEPTH, POINT_DEPTH,
    POLYGON_DEPTH,
};
