use std::borrow::Cow;

use wgpu::*;

use super::shader::DRAPE_SHADER;

/// Bind group layouts and the shared pipeline layout
pub struct DrapeLayouts {
    pub bgl_buffers: BindGroupLayout,
    pub bgl_terrain: BindGroupLayout,
    pub pipeline_layout: PipelineLayout,
}

/// One compute pipeline per pass, all from the same module
pub struct DrapePasses {
    pub count: ComputePipeline,
    pub offset: ComputePipeline,
    pub subdivide: ComputePipeline,
    pub mesh: ComputePipeline,
    pub drape: ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn create_layouts(device: &Device) -> DrapeLayouts {
    // group(0): params UBO, three read-only inputs, five read-write outputs
    let bgl_buffers = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("geodrape.Terrain.bgl.buffers"),
        entries: &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, false),
            storage_entry(5, false),
            storage_entry(6, false),
            storage_entry(7, false),
            storage_entry(8, false),
        ],
    });

    // group(1): height texture + sampler, rebuilt when the raster changes
    let bgl_terrain = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("geodrape.Terrain.bgl.terrain"),
        entries: &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("geodrape.Terrain.pipeline_layout"),
        bind_group_layouts: &[&bgl_buffers, &bgl_terrain],
        push_constant_ranges: &[],
    });

    DrapeLayouts {
        bgl_buffers,
        bgl_terrain,
        pipeline_layout,
    }
}

pub fn create_passes(device: &Device, layouts: &DrapeLayouts) -> DrapePasses {
    let module = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("geodrape.Terrain.shader"),
        source: ShaderSource::Wgsl(Cow::Borrowed(DRAPE_SHADER)),
    });

    let make = |label: &str, entry_point: &str| {
        device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&layouts.pipeline_layout),
            module: &module,
            entry_point,
        })
    };

    DrapePasses {
        count: make("geodrape.Terrain.count", "cs_count"),
        offset: make("geodrape.Terrain.offset", "cs_offset"),
        subdivide: make("geodrape.Terrain.subdivide", "cs_subdivide"),
        mesh: make("geodrape.Terrain.mesh", "cs_mesh"),
        drape: make("geodrape.Terrain.drape", "cs_drape"),
    }
}
