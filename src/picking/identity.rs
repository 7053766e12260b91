// src/picking/identity.rs
// Dense feature identities encoded as 24-bit RGB colors

use std::collections::HashMap;

use crate::error::{RenderError, RenderResult};

/// Largest id representable in three 8-bit channels
pub const MAX_IDENTITY: u32 = 0x00FF_FFFF;

/// Id reserved for "no feature" (the hidden target's clear color)
pub const NO_FEATURE: u32 = 0;

/// RGBA8 color carrying a dense id: R = bits 16..24, G = 8..16, B = 0..8, A = 255
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityColor(pub [u8; 4]);

impl IdentityColor {
    /// Encode an id in `1..=MAX_IDENTITY`
    pub fn encode(id: u32) -> Option<Self> {
        if id == NO_FEATURE || id > MAX_IDENTITY {
            return None;
        }
        Some(Self([(id >> 16) as u8, (id >> 8) as u8, id as u8, 0xFF]))
    }

    /// Decode a texel; anything that is not fully opaque is background
    pub fn decode(texel: [u8; 4]) -> u32 {
        if texel[3] != 0xFF {
            return NO_FEATURE;
        }
        ((texel[0] as u32) << 16) | ((texel[1] as u32) << 8) | texel[2] as u32
    }

    pub fn id(&self) -> u32 {
        Self::decode(self.0)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

/// Id allocator plus the id <-> color maps, owned by one picker
#[derive(Debug)]
pub struct IdentityTable {
    next_id: u32,
    id_to_color: HashMap<u32, IdentityColor>,
    color_to_id: HashMap<IdentityColor, u32>,
}

impl Default for IdentityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            id_to_color: HashMap::new(),
            color_to_id: HashMap::new(),
        }
    }

    /// Ids handed out since the last reset
    pub fn allocated(&self) -> u32 {
        self.next_id - 1
    }

    /// Whether `count` more ids fit
    pub fn can_allocate(&self, count: usize) -> bool {
        (self.next_id as u64 - 1) + count as u64 <= MAX_IDENTITY as u64
    }

    pub fn allocate(&mut self) -> RenderResult<(u32, IdentityColor)> {
        let id = self.next_id;
        let color = IdentityColor::encode(id).ok_or(RenderError::IdentityExhausted(id - 1))?;
        self.next_id += 1;
        self.id_to_color.insert(id, color);
        self.color_to_id.insert(color, id);
        Ok((id, color))
    }

    /// Forget one id; it is not handed out again
    pub fn release(&mut self, id: u32) {
        if let Some(color) = self.id_to_color.remove(&id) {
            self.color_to_id.remove(&color);
        }
    }

    pub fn color_of(&self, id: u32) -> Option<IdentityColor> {
        self.id_to_color.get(&id).copied()
    }

    /// Resolve a texel read from the hidden target
    pub fn resolve(&self, texel: [u8; 4]) -> Option<u32> {
        if IdentityColor::decode(texel) == NO_FEATURE {
            return None;
        }
        self.color_to_id.get(&IdentityColor(texel)).copied()
    }

    /// Reset the counter and both maps
    pub fn reset(&mut self) {
        self.next_id = 1;
        self.id_to_color.clear();
        self.color_to_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_round_trip_edges() {
        for id in [1, 2, 255, 256, 65_535, 65_536, MAX_IDENTITY - 1, MAX_IDENTITY] {
            let color = IdentityColor::encode(id).unwrap();
            assert_eq!(IdentityColor::decode(color.bytes()), id);
        }
    }

    #[test]
    fn test_round_trip_sampled_range() {
        let mut id = 1u32;
        while id <= MAX_IDENTITY {
            assert_eq!(IdentityColor::encode(id).unwrap().id(), id);
            id += 4099;
        }
    }

    #[test]
    fn test_reserved_and_out_of_range() {
        assert!(IdentityColor::encode(0).is_none());
        assert!(IdentityColor::encode(MAX_IDENTITY + 1).is_none());
        assert_eq!(IdentityColor::decode([0, 0, 0, 0]), NO_FEATURE);
        assert_eq!(IdentityColor::decode([0, 0, 7, 0]), NO_FEATURE);
    }

    #[test]
    fn test_distinct_features_get_distinct_ids() {
        let mut table = IdentityTable::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let (id, color) = table.allocate().unwrap();
            assert_eq!(table.resolve(color.bytes()), Some(id));
            assert!(seen.insert(id));
        }
        assert_eq!(table.allocated(), 1000);
    }

    #[test]
    fn test_release_and_reset() {
        let mut table = IdentityTable::new();
        let (a, ca) = table.allocate().unwrap();
        let (b, _) = table.allocate().unwrap();
        table.release(a);
        assert_eq!(table.resolve(ca.bytes()), None);
        let (c, _) = table.allocate().unwrap();
        assert!(c > b);
        table.reset();
        assert_eq!(table.allocate().unwrap().0, 1);
    }

    #[test]
    fn test_can_allocate_limit() {
        let table = IdentityTable::new();
        assert!(table.can_allocate(MAX_IDENTITY as usize));
        assert!(!table.can_allocate(MAX_IDENTITY as usize + 1));
    }
}
