//! Instanced cube draw of the voxel fragments or their bricks

use std::sync::Arc;

use crate::gi::params::DebugDrawParams;
use crate::render::resources::ResourceFactory;
use crate::voxel::indirect::{self, DRAW_ARGS_OFFSET, FRAGMENT_SLOT};

use super::{storage_entry, texture_entry, uniform_entry};

pub const DEBUG_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEBUG_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Views the debug draw reads from.
pub struct DebugSources<'a> {
    pub nodes: &'a wgpu::Buffer,
    pub fragments: &'a wgpu::Buffer,
    pub opacity: &'a wgpu::TextureView,
    pub irradiance: &'a wgpu::TextureView,
}

pub struct DebugDrawPipeline {
    pipeline: wgpu::RenderPipeline,
    params_buffer: Arc<wgpu::Buffer>,
    octree_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    params_bind_group: wgpu::BindGroup,
}

impl DebugDrawPipeline {
    pub fn new(device: &wgpu::Device, factory: &ResourceFactory) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("debug_draw_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_read.wgsl"),
                    include_str!("../../../shaders/debug_draw.wgsl"),
                )
                .into(),
            ),
        });

        let params_buffer = factory.buffer(
            "debug_draw_params",
            std::mem::size_of::<DebugDrawParams>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let vertex = wgpu::ShaderStages::VERTEX;
        let octree_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("debug_draw_octree_layout"),
            entries: &[storage_entry(0, vertex, true), storage_entry(1, vertex, true)],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("debug_draw_volume_layout"),
            entries: &[
                texture_entry(0, vertex, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D3),
                texture_entry(1, vertex, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D3),
            ],
        });
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("debug_draw_params_layout"),
            entries: &[uniform_entry::<DebugDrawParams>(0, vertex, false)],
        });
        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("debug_draw_params_bind_group"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("debug_draw_pipeline_layout"),
            bind_group_layouts: &[&octree_layout, &volume_layout, &params_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("debug_draw_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: DEBUG_COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEBUG_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        Self {
            pipeline,
            params_buffer,
            octree_layout,
            volume_layout,
            params_bind_group,
        }
    }

    pub fn update_params(&self, queue: &wgpu::Queue, params: &DebugDrawParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    pub fn create_bind_groups(&self, device: &wgpu::Device, sources: &DebugSources<'_>) -> [wgpu::BindGroup; 2] {
        let octree = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("debug_draw_octree_bind_group"),
            layout: &self.octree_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: sources.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sources.fragments.as_entire_binding(),
                },
            ],
        });
        let volumes = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("debug_draw_volume_bind_group"),
            layout: &self.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(sources.opacity),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(sources.irradiance),
                },
            ],
        });
        [octree, volumes]
    }

    /// Clear the target and draw one cube per fragment. The instance count
    /// comes from the fragment record.
    pub fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        bind_groups: &[wgpu::BindGroup; 2],
        records: &wgpu::Buffer,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("debug_draw_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_groups[0], &[]);
        pass.set_bind_group(1, &bind_groups[1], &[]);
        pass.set_bind_group(2, &self.params_bind_group, &[]);
        pass.draw_indirect(records, indirect::slot_offset(FRAGMENT_SLOT) + DRAW_ARGS_OFFSET);
    }
}
