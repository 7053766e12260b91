// src/geo/translator.rs
// Geographic -> render space translation with a drifting reference point and a bounded cache

use crate::config::TranslatorConfig;
use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

use super::batch::BatchProjector;
use super::cache::{CacheKey, TranslationCache};
use super::mercator::{
    clamp_latitude, geo_to_world, render_to_world, world_to_geo, world_to_render, GeographicCoordinate,
    RenderCoordinate, WorldCoordinate,
};

/// Current view parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub center: GeographicCoordinate,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
}

/// Partial transform; `None` fields keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformUpdate {
    pub center: Option<GeographicCoordinate>,
    pub zoom: Option<f64>,
    pub bearing: Option<f64>,
    pub pitch: Option<f64>,
}

/// High-precision anchor all render coordinates are relative to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    pub geo: GeographicCoordinate,
    pub world: WorldCoordinate,
}

impl ReferencePoint {
    pub fn new(geo: GeographicCoordinate) -> Self {
        Self {
            geo,
            world: geo_to_world(geo),
        }
    }
}

/// Snapshot returned by [`CoordinateTranslator::get_metrics`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslatorMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub cache_len: usize,
    pub cache_evictions: u64,
    pub rebases: u64,
    pub parallel_batches: u64,
    pub cpu_fallbacks: u64,
    /// Estimated device memory held by the compute path
    pub device_bytes: u64,
}

pub struct CoordinateTranslator {
    config: TranslatorConfig,
    transform: Transform,
    reference: ReferencePoint,
    cache: TranslationCache,
    projector: Option<BatchProjector>,
    rebases: u64,
    parallel_batches: u64,
    cpu_fallbacks: u64,
}

impl CoordinateTranslator {
    /// Create a translator. Without a GPU context batches always run on the CPU.
    pub fn new(config: TranslatorConfig, gpu: Option<GpuContext>) -> Self {
        let center = GeographicCoordinate::from(config.initial_center);
        let projector = match gpu {
            Some(gpu) if config.parallel_compute => Some(BatchProjector::new(gpu)),
            _ => None,
        };
        Self {
            cache: TranslationCache::new(config.cache_size),
            transform: Transform {
                center,
                zoom: 0.0,
                bearing: 0.0,
                pitch: 0.0,
            },
            reference: ReferencePoint::new(center),
            config,
            projector,
            rebases: 0,
            parallel_batches: 0,
            cpu_fallbacks: 0,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn reference(&self) -> &ReferencePoint {
        &self.reference
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Merge a partial transform. Returns true when the reference point moved,
    /// in which case the whole cache was dropped.
    pub fn update_transform(&mut self, update: TransformUpdate) -> RenderResult<bool> {
        if let Some(center) = update.center {
            center.validate()?;
        }
        if let Some(zoom) = update.zoom.filter(|z| !z.is_finite()) {
            return Err(RenderError::conversion(format!("non-finite zoom {}", zoom)));
        }

        if let Some(center) = update.center {
            self.transform.center = center;
        }
        if let Some(zoom) = update.zoom {
            self.transform.zoom = zoom;
        }
        if let Some(bearing) = update.bearing {
            self.transform.bearing = bearing;
        }
        if let Some(pitch) = update.pitch {
            self.transform.pitch = pitch;
        }

        let center = self.transform.center;
        let drift = (center.lng - self.reference.geo.lng)
            .abs()
            .max((center.lat - self.reference.geo.lat).abs());
        if drift > self.config.precision_threshold {
            self.reference = ReferencePoint::new(center);
            self.cache.clear();
            self.rebases += 1;
            log::debug!(
                "reference point rebased to ({:.6}, {:.6}) after {:.6} deg drift",
                center.lng,
                center.lat,
                drift
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Translate one coordinate, consulting the cache first
    pub fn translate_one(&mut self, geo: GeographicCoordinate) -> RenderResult<RenderCoordinate> {
        geo.validate()?;
        let key = CacheKey::quantize(geo, self.transform.zoom);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let render = self.project(geo);
        self.cache.insert(key, render);
        Ok(render)
    }

    /// Translate many coordinates. Large batches run on the compute path when
    /// it is available; any failure there falls back to [`Self::translate_one`].
    pub async fn translate_batch(
        &mut self,
        geos: &[GeographicCoordinate],
    ) -> RenderResult<Vec<RenderCoordinate>> {
        for geo in geos {
            geo.validate()?;
        }

        if geos.len() >= self.config.batch_threshold && self.config.parallel_compute {
            if let Some(projector) = self.projector.as_mut() {
                let ref_lng = self.reference.geo.lng;
                let ref_lat = clamp_latitude(self.reference.geo.lat);
                let deltas: Vec<[f32; 2]> = geos
                    .iter()
                    .map(|g| [(g.lng - ref_lng) as f32, (clamp_latitude(g.lat) - ref_lat) as f32])
                    .collect();
                let scale = self.transform.zoom.exp2() as f32;
                match projector.project(&deltas, ref_lat, scale).await
                {
                    Ok(out) => {
                        self.parallel_batches += 1;
                        return Ok(out);
                    }
                    Err(err) => {
                        self.cpu_fallbacks += 1;
                        log::warn!(
                            "[{}] parallel translation of {} coordinates failed, using CPU path: {}",
                            err.category(),
                            geos.len(),
                            err
                        );
                    }
                }
            }
        }

        geos.iter().map(|g| self.translate_one(*g)).collect()
    }

    /// Approximate inverse of [`Self::translate_one`]
    pub fn untranslate(&self, render: RenderCoordinate) -> GeographicCoordinate {
        world_to_geo(render_to_world(render, self.reference.world, self.transform.zoom))
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn get_metrics(&self) -> TranslatorMetrics {
        let stats = self.cache.stats();
        TranslatorMetrics {
            cache_hits: stats.hits,
            cache_misses: stats.misses,
            cache_hit_ratio: self.cache.hit_ratio(),
            cache_len: self.cache.len(),
            cache_evictions: stats.evictions,
            rebases: self.rebases,
            parallel_batches: self.parallel_batches,
            cpu_fallbacks: self.cpu_fallbacks,
            device_bytes: self.projector.as_ref().map_or(0, |p| p.held_bytes()),
        }
    }

    fn project(&self, geo: GeographicCoordinate) -> RenderCoordinate {
        world_to_render(geo_to_world(geo), self.reference.world, self.transform.zoom)
    }
}
