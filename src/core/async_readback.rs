//! Staging buffers for GPU → CPU readback
//!
//! A `ReadbackBuffer` remembers whether a map request is still in flight so a
//! later caller never issues a copy into a buffer that is pending or mapped.
//! Reuse always goes through [`ReadbackBuffer::settle`] first.

use std::sync::{Arc, Mutex};

use futures_intrusive::channel::shared::oneshot_channel;
use wgpu::{Buffer, BufferDescriptor, BufferUsages, Device};

use crate::error::{RenderError, RenderResult};
use crate::gpu::align_copy_bpr;

/// Map state of a staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    /// Free for a new copy
    Idle,
    /// `map_async` issued, callback not yet fired
    Pending,
    /// Mapped by a reader that never unmapped (dropped future)
    Mapped,
}

/// A MAP_READ buffer with tracked map state
pub struct ReadbackBuffer {
    buffer: Buffer,
    size: u64,
    label: &'static str,
    state: Arc<Mutex<StagingState>>,
}

impl ReadbackBuffer {
    pub fn new(device: &Device, size: u64, label: &'static str) -> Self {
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: size.max(4),
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            size: size.max(4),
            label,
            state: Arc::new(Mutex::new(StagingState::Idle)),
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> StagingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_pending(&self) -> bool {
        self.state() == StagingState::Pending
    }

    /// Bring the buffer back to `Idle`: wait out a pending map, unmap a
    /// mapped one. Must be called before encoding a copy into it.
    pub fn settle(&self, device: &Device) {
        if self.state() == StagingState::Pending {
            log::debug!("{}: waiting for superseded map request", self.label);
            device.poll(wgpu::Maintain::Wait);
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            StagingState::Mapped => {
                self.buffer.unmap();
                *state = StagingState::Idle;
            }
            StagingState::Pending => {
                // Callback never fired even after a full wait; the map request
                // is dead, so the buffer is not mapped.
                log::warn!("{}: map request did not complete, discarding", self.label);
                *state = StagingState::Idle;
            }
            StagingState::Idle => {}
        }
    }

    /// Grow to at least `size` bytes. Settles first; contents are discarded.
    pub fn ensure_capacity(&mut self, device: &Device, size: u64) {
        if size <= self.size {
            return;
        }
        self.settle(device);
        let new_size = size.max(self.size * 2);
        *self = Self::new(device, new_size, self.label);
    }

    /// Map the first `len` bytes and copy them out. The copy into this buffer
    /// must already be submitted.
    pub async fn read(&self, device: &Device, len: u64) -> RenderResult<Vec<u8>> {
        if len > self.size {
            return Err(RenderError::readback(format!(
                "{}: requested {} bytes from a {} byte buffer",
                self.label, len, self.size
            )));
        }

        let slice = self.buffer.slice(0..len);
        let (sender, receiver) = oneshot_channel();
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = StagingState::Pending;

        let state = self.state.clone();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            *state.lock().unwrap_or_else(|e| e.into_inner()) = if result.is_ok() {
                StagingState::Mapped
            } else {
                StagingState::Idle
            };
            sender.send(result).ok();
        });

        device.poll(wgpu::Maintain::Wait);
        receiver
            .receive()
            .await
            .ok_or_else(|| RenderError::readback(format!("{}: map callback dropped", self.label)))?
            .map_err(|e| RenderError::readback(format!("{}: map_async failed: {:?}", self.label, e)))?;

        let data = slice.get_mapped_range().to_vec();
        self.buffer.unmap();
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = StagingState::Idle;
        Ok(data)
    }
}

/// Encode a copy of a `width`×`height` region of an RGBA8 texture starting at
/// `origin` into `buffer`, using padded rows. Returns the padded row stride.
pub fn encode_texture_region_copy(
    encoder: &mut wgpu::CommandEncoder,
    texture: &wgpu::Texture,
    buffer: &Buffer,
    origin: (u32, u32),
    width: u32,
    height: u32,
) -> u32 {
    let padded_bpr = align_copy_bpr(width * 4);
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: origin.0,
                y: origin.1,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    padded_bpr
}

/// Strip row padding from a readback of `height` rows of `row_bytes` each.
pub fn depad_rows(data: &[u8], row_bytes: usize, padded_bpr: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let start = y * padded_bpr;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depad_rows() {
        let mut data = vec![0u8; 512];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let out = depad_rows(&data, 8, 256, 2);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    }
}
