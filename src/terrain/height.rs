//! Terrain-RGB height decoding and a CPU height raster.
//!
//! Heights are packed as `R·256 + G + B/256 − 32768` meters. A texel is
//! rejected (and contributes 0) when its alpha is below one half, when it is
//! the all-black or all-white sentinel, or when the decoded value falls
//! outside `[0, MAX_HEIGHT_M]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

use super::resources::TerrainResources;

/// Highest accepted terrain height in meters
pub const MAX_HEIGHT_M: f32 = 9000.0;

/// Meters → render-space z divisor
pub const HEIGHT_DIVISOR: f32 = 50_000_000.0;

/// Normalized alpha below which a texel carries no height
pub const ALPHA_THRESHOLD: f32 = 0.5;

const HEIGHT_BIAS: f32 = 32_768.0;

/// Decode one RGBA8 texel. `None` for rejected texels.
pub fn decode_height(texel: [u8; 4]) -> Option<f32> {
    let [r, g, b, a] = texel;
    if (a as f32 / 255.0) < ALPHA_THRESHOLD {
        return None;
    }
    if (r, g, b) == (0, 0, 0) || (r, g, b) == (255, 255, 255) {
        return None;
    }
    let h = r as f32 * 256.0 + g as f32 + b as f32 / 256.0 - HEIGHT_BIAS;
    if (0.0..=MAX_HEIGHT_M).contains(&h) {
        Some(h)
    } else {
        None
    }
}

/// Inverse of [`decode_height`] for opaque texels.
pub fn encode_height(meters: f32) -> [u8; 4] {
    let v = (meters + HEIGHT_BIAS).clamp(0.0, 65_535.996);
    let whole = v.floor();
    let r = (whole / 256.0).floor() as u8;
    let g = (whole as u32 % 256) as u8;
    let b = ((v - whole) * 256.0).floor() as u8;
    [r, g, b, 255]
}

/// Render-space z for a height in meters.
#[inline]
pub fn height_to_z(meters: f32, exaggeration: f32, depth_offset: f32) -> f32 {
    meters.clamp(0.0, MAX_HEIGHT_M) * exaggeration / HEIGHT_DIVISOR + depth_offset
}

/// Extent of a height raster in the same space as the line positions.
/// Row 0 of the raster is the `max.y` edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainBounds {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl TerrainBounds {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> RenderResult<Self> {
        if !(max[0] > min[0] && max[1] > min[1]) {
            return Err(RenderError::config(format!(
                "terrain bounds must have positive extent: {:?} .. {:?}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn size(&self) -> [f32; 2] {
        [self.max[0] - self.min[0], self.max[1] - self.min[1]]
    }

    pub fn to_uv(&self, p: [f32; 2]) -> [f32; 2] {
        let [w, h] = self.size();
        [(p[0] - self.min[0]) / w, (self.max[1] - p[1]) / h]
    }

    /// Inside `[−margin, 1 + margin]` on both axes
    pub fn contains_uv(uv: [f32; 2], margin: f32) -> bool {
        uv.iter().all(|c| *c >= -margin && *c <= 1.0 + margin)
    }
}

/// RGBA8 terrain raster kept on the CPU
#[derive(Debug, Clone)]
pub struct HeightRaster {
    width: u32,
    height: u32,
    texels: Vec<[u8; 4]>,
}

impl HeightRaster {
    pub fn new(width: u32, height: u32, texels: Vec<[u8; 4]>) -> RenderResult<Self> {
        if width == 0 || height == 0 || texels.len() != (width * height) as usize {
            return Err(RenderError::upload(format!(
                "raster {}x{} needs {} texels, got {}",
                width,
                height,
                width as u64 * height as u64,
                texels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    /// Raster with every texel at `meters`
    pub fn uniform(width: u32, height: u32, meters: f32) -> RenderResult<Self> {
        Self::new(width, height, vec![encode_height(meters); (width * height) as usize])
    }

    /// Build from a height function of texel coordinates
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> RenderResult<Self> {
        let mut texels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                texels.push(encode_height(f(x, y)));
            }
        }
        Self::new(width, height, texels)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texels(&self) -> &[[u8; 4]] {
        &self.texels
    }

    /// Decoded height with clamp-to-edge addressing; rejected texels give 0
    pub fn height_at(&self, x: i64, y: i64) -> f32 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        decode_height(self.texels[y * self.width as usize + x]).unwrap_or(0.0)
    }

    /// Bilinear height at a UV, texel centers at `(i + 0.5) / size`
    pub fn sample(&self, uv: [f32; 2]) -> f32 {
        let px = uv[0].clamp(0.0, 1.0) * self.width as f32 - 0.5;
        let py = uv[1].clamp(0.0, 1.0) * self.height as f32 - 0.5;
        let (x0, y0) = (px.floor(), py.floor());
        let (fx, fy) = (px - x0, py - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let h00 = self.height_at(x0, y0);
        let h10 = self.height_at(x0 + 1, y0);
        let h01 = self.height_at(x0, y0 + 1);
        let h11 = self.height_at(x0 + 1, y0 + 1);
        let top = h00 + (h10 - h00) * fx;
        let bottom = h01 + (h11 - h01) * fx;
        top + (bottom - top) * fy
    }

    /// Surface normal from central differences one texel apart
    pub fn normal(&self, uv: [f32; 2], bounds: &TerrainBounds, exaggeration: f32) -> [f32; 3] {
        let du = 1.0 / self.width as f32;
        let dv = 1.0 / self.height as f32;
        let scale = exaggeration / HEIGHT_DIVISOR;
        let [w, h] = bounds.size();

        let west = self.sample([uv[0] - du, uv[1]]);
        let east = self.sample([uv[0] + du, uv[1]]);
        let north = self.sample([uv[0], uv[1] - dv]);
        let south = self.sample([uv[0], uv[1] + dv]);

        let dzdx = (east - west) * scale / (2.0 * du * w);
        let dzdy = (north - south) * scale / (2.0 * dv * h);
        let n = glam::Vec3::new(-dzdx, -dzdy, 1.0).normalize();
        n.to_array()
    }

    /// Upload as an `Rgba8Unorm` texture with a clamp-to-edge sampler.
    pub fn upload(&self, gpu: &GpuContext, bounds: TerrainBounds) -> TerrainResources {
        let size = wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("geodrape.Terrain.HeightTexture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&self.texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("geodrape.Terrain.HeightSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        log::debug!("uploaded {}x{} height raster", self.width, self.height);
        TerrainResources::new(Arc::new(view), Arc::new(sampler), bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_thousand_meters() {
        assert_eq!(decode_height([131, 232, 0, 255]), Some(1000.0));
        assert_eq!(encode_height(1000.0), [131, 232, 0, 255]);
    }

    #[test]
    fn test_rejected_texels() {
        assert_eq!(decode_height([131, 232, 0, 100]), None);
        assert_eq!(decode_height([0, 0, 0, 255]), None);
        assert_eq!(decode_height([255, 255, 255, 255]), None);
        // 9001 m
        assert_eq!(decode_height(encode_height(9001.0)), None);
        // below sea level
        assert_eq!(decode_height([127, 0, 0, 255]), None);
    }

    #[test]
    fn test_encode_roundtrip_fractional() {
        let h = decode_height(encode_height(1234.5)).unwrap();
        assert!((h - 1234.5).abs() < 1.0 / 256.0);
    }

    #[test]
    fn test_height_to_z_range() {
        assert_eq!(height_to_z(-5.0, 2.0, 0.0), 0.0);
        assert_eq!(height_to_z(20_000.0, 2.0, 0.0), 2.0 * 9000.0 / HEIGHT_DIVISOR);
    }

    #[test]
    fn test_bounds_uv_row_zero_is_north() {
        let b = TerrainBounds::new([-1.0, -1.0], [1.0, 1.0]).unwrap();
        assert_eq!(b.to_uv([-1.0, 1.0]), [0.0, 0.0]);
        assert_eq!(b.to_uv([1.0, -1.0]), [1.0, 1.0]);
        assert!(TerrainBounds::contains_uv([1.005, 0.5], 0.01));
        assert!(!TerrainBounds::contains_uv([1.02, 0.5], 0.01));
        assert!(TerrainBounds::new([0.0, 0.0], [0.0, 1.0]).is_err());
    }

    #[test]
    fn test_bilinear_sample_between_texels() {
        let raster = HeightRaster::from_fn(2, 1, |x, _| if x == 0 { 100.0 } else { 200.0 }).unwrap();
        // texel centers at u = 0.25 and 0.75
        assert!((raster.sample([0.25, 0.5]) - 100.0).abs() < 1e-3);
        assert!((raster.sample([0.5, 0.5]) - 150.0).abs() < 1e-3);
        assert!((raster.sample([1.0, 0.5]) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_flat_normal_points_up() {
        let raster = HeightRaster::uniform(4, 4, 500.0).unwrap();
        let bounds = TerrainBounds::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        assert_eq!(raster.normal([0.5, 0.5], &bounds, 1.0), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_raster_size_mismatch() {
        assert!(HeightRaster::new(2, 2, vec![[0; 4]; 3]).is_err());
    }
}
