use wgpu::*;

use super::creation::DrapeLayouts;
use super::DrapeBuffers;

pub fn make_bg_buffers(layouts: &DrapeLayouts, device: &Device, buffers: &DrapeBuffers) -> BindGroup {
    let bindings: [&Buffer; 9] = [
        &buffers.params,
        &buffers.coarse,
        &buffers.segments,
        &buffers.styles,
        &buffers.work,
        &buffers.points,
        &buffers.vertices,
        &buffers.indices,
        &buffers.totals,
    ];
    let entries: Vec<BindGroupEntry> = bindings
        .iter()
        .enumerate()
        .map(|(binding, buffer)| BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();

    device.create_bind_group(&BindGroupDescriptor {
        label: Some("geodrape.Terrain.bg.buffers"),
        layout: &layouts.bgl_buffers,
        entries: &entries,
    })
}

/// Height texture/sampler bind group
pub fn make_bg_terrain(layouts: &DrapeLayouts, device: &Device, view: &TextureView, samp: &Sampler) -> BindGroup {
    device.create_bind_group(&BindGroupDescriptor {
        label: Some("geodrape.Terrain.bg.terrain"),
        layout: &layouts.bgl_terrain,
        entries: &[
            BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(view),
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::Sampler(samp),
            },
        ],
    })
}
