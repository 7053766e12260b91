//! Bounded translation cache with insertion-order eviction

use std::collections::{HashMap, VecDeque};

use super::mercator::{GeographicCoordinate, RenderCoordinate};

/// Decimal places kept for longitude/latitude in cache keys
pub const COORD_KEY_SCALE: f64 = 1e6;
/// Decimal places kept for zoom in cache keys
pub const ZOOM_KEY_SCALE: f64 = 1e2;

/// Quantized (lng, lat, zoom)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lng: i64,
    lat: i64,
    zoom: i32,
}

impl CacheKey {
    pub fn quantize(geo: GeographicCoordinate, zoom: f64) -> Self {
        Self {
            lng: (geo.lng * COORD_KEY_SCALE).round() as i64,
            lat: (geo.lat * COORD_KEY_SCALE).round() as i64,
            zoom: (zoom * ZOOM_KEY_SCALE).round() as i32,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub clears: u64,
}

/// Translation cache. Eviction drops the oldest inserted key, lookups do not
/// refresh recency.
#[derive(Debug)]
pub struct TranslationCache {
    capacity: usize,
    entries: HashMap<CacheKey, RenderCoordinate>,
    order: VecDeque<CacheKey>,
    stats: CacheStats,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1 << 16)),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<RenderCoordinate> {
        match self.entries.get(key) {
            Some(v) => {
                self.stats.hits += 1;
                Some(*v)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, value: RenderCoordinate) {
        if self.entries.insert(key, value).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drop every entry; counters survive
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.stats.clears += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.stats.hits + self.stats.misses;
        if total == 0 {
            0.0
        } else {
            self.stats.hits as f64 / total as f64
        }
    }
}
