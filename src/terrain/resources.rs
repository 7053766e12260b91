//! Externally owned terrain raster bindings

use std::sync::Arc;

use super::height::TerrainBounds;

/// Height texture view, its sampler and the raster's extent. Identity of the
/// view and sampler is by `Arc` pointer, so cloning a `TerrainResources`
/// never counts as a change.
#[derive(Clone)]
pub struct TerrainResources {
    pub view: Arc<wgpu::TextureView>,
    pub sampler: Arc<wgpu::Sampler>,
    pub bounds: TerrainBounds,
}

impl TerrainResources {
    pub fn new(view: Arc<wgpu::TextureView>, sampler: Arc<wgpu::Sampler>, bounds: TerrainBounds) -> Self {
        Self {
            view,
            sampler,
            bounds,
        }
    }

    /// Same view and sampler objects
    pub fn same_bindings(&self, other: &TerrainResources) -> bool {
        Arc::ptr_eq(&self.view, &other.view) && Arc::ptr_eq(&self.sampler, &other.sampler)
    }

    /// Compare against the current resources
    pub fn diff(&self, current: Option<&TerrainResources>) -> ResourceUpdate {
        match current {
            None => ResourceUpdate::BindingsAndBounds,
            Some(current) => {
                let bindings = !self.same_bindings(current);
                let bounds = self.bounds != current.bounds;
                match (bindings, bounds) {
                    (false, false) => ResourceUpdate::Unchanged,
                    (false, true) => ResourceUpdate::Bounds,
                    (true, false) => ResourceUpdate::Bindings,
                    (true, true) => ResourceUpdate::BindingsAndBounds,
                }
            }
        }
    }
}

impl std::fmt::Debug for TerrainResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainResources")
            .field("view", &Arc::as_ptr(&self.view))
            .field("sampler", &Arc::as_ptr(&self.sampler))
            .field("bounds", &self.bounds)
            .finish()
    }
}

/// What `update_terrain_resources` had to rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUpdate {
    /// Nothing changed
    Unchanged,
    /// Only the params uniform was rewritten
    Bounds,
    /// Only the terrain bind group was rebuilt
    Bindings,
    /// Bind group rebuilt and params rewritten
    BindingsAndBounds,
}

impl ResourceUpdate {
    pub fn rebuilt_bind_group(self) -> bool {
        matches!(self, ResourceUpdate::Bindings | ResourceUpdate::BindingsAndBounds)
    }

    pub fn rewrote_params(self) -> bool {
        matches!(self, ResourceUpdate::Bounds | ResourceUpdate::BindingsAndBounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_flags() {
        assert!(!ResourceUpdate::Unchanged.rebuilt_bind_group());
        assert!(!ResourceUpdate::Unchanged.rewrote_params());
        assert!(ResourceUpdate::Bounds.rewrote_params());
        assert!(!ResourceUpdate::Bounds.rebuilt_bind_group());
        assert!(ResourceUpdate::Bindings.rebuilt_bind_group());
        assert!(ResourceUpdate::BindingsAndBounds.rebuilt_bind_group());
        assert!(ResourceUpdate::BindingsAndBounds.rewrote_params());
    }
}
