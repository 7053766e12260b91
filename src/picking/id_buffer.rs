// src/picking/id_buffer.rs
// Visible + hidden (identity) render targets fed by one vertex stream
// One shader module: a shared vertex stage and two fragment stages

use wgpu::{BindGroup, Buffer, Device, RenderPipeline, Texture, TextureView};

use super::triangulate::PickVertex;

pub const VISIBLE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const IDENTITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// View uniforms shared by both passes
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IdBufferUniforms {
    pub view_proj: [[f32; 4]; 4],
}

struct Targets {
    visible: Texture,
    visible_view: TextureView,
    identity: Texture,
    identity_view: TextureView,
    #[allow(dead_code)]
    depth: Texture,
    depth_view: TextureView,
}

impl Targets {
    fn new(device: &Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let make = |label: &str, format: wgpu::TextureFormat, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };

        let visible = make(
            "geodrape.Picking.VisibleTarget",
            VISIBLE_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let identity = make(
            "geodrape.Picking.IdentityTarget",
            IDENTITY_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = make(
            "geodrape.Picking.Depth",
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );

        Self {
            visible_view: visible.create_view(&wgpu::TextureViewDescriptor::default()),
            identity_view: identity.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            visible,
            identity,
            depth,
        }
    }
}

/// Render targets and the two pipelines
pub struct IdBufferPass {
    targets: Targets,
    visible_pipeline: RenderPipeline,
    identity_pipeline: RenderPipeline,
    uniform_buffer: Buffer,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

impl IdBufferPass {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("geodrape.Picking.BindGroupLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geodrape.Picking.Uniforms"),
            size: std::mem::size_of::<IdBufferUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("geodrape.Picking.BindGroup"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("geodrape.Picking.Shader"),
            source: wgpu::ShaderSource::Wgsl(PICKING_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("geodrape.Picking.PipelineLayout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let visible_pipeline = create_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "geodrape.Picking.VisiblePipeline",
            "fs_visible",
            VISIBLE_FORMAT,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        );
        let identity_pipeline = create_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "geodrape.Picking.IdentityPipeline",
            "fs_identity",
            IDENTITY_FORMAT,
            None,
        );

        Self {
            targets: Targets::new(device, width, height),
            visible_pipeline,
            identity_pipeline,
            uniform_buffer,
            bind_group,
            width,
            height,
        }
    }

    /// Recreate the targets; pipelines are size independent
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return;
        }
        self.targets = Targets::new(device, width, height);
        self.width = width;
        self.height = height;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn visible_texture(&self) -> &Texture {
        &self.targets.visible
    }

    pub fn identity_texture(&self) -> &Texture {
        &self.targets.identity
    }

    pub fn update_uniforms(&self, queue: &wgpu::Queue, view_proj: [[f32; 4]; 4]) {
        let uniforms = IdBufferUniforms { view_proj };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    /// Record the visible pass and then the identity pass over the same
    /// vertex/index buffers. With no geometry both targets are only cleared.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        geometry: Option<(&Buffer, &Buffer, u32)>,
    ) {
        let passes = [
            (
                "geodrape.Picking.VisiblePass",
                &self.targets.visible_view,
                &self.visible_pipeline,
            ),
            (
                "geodrape.Picking.IdentityPass",
                &self.targets.identity_view,
                &self.identity_pipeline,
            ),
        ];

        for (label, view, pipeline) in passes {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((vertices, indices, index_count)) = geometry {
                if index_count > 0 {
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &self.bind_group, &[]);
                    pass.set_vertex_buffer(0, vertices.slice(..));
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..index_count, 0, 0..1);
                }
            }
        }
    }
}

/// Both pipelines differ only in fragment entry point, format and blend
fn create_pipeline(
    device: &Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    label: &str,
    fragment_entry: &str,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: "vs_main",
            buffers: &[PickVertex::desc()],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: fragment_entry,
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

const PICKING_SHADER: &str = r#"
struct Uniforms {
    view_proj: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) identity: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) @interpolate(flat) identity: vec4<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = u.view_proj * vec4<f32>(in.position, 1.0);
    out.color = in.color;
    out.identity = in.identity;
    return out;
}

@fragment
fn fs_visible(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}

@fragment
fn fs_identity(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.identity;
}
"#;
