//! Voxel cone tracing compute pipeline

use std::sync::Arc;

use crate::gi::params::ConeTraceParams;
use crate::render::resources::ResourceFactory;

use super::octree::NO_OFFSETS;
use super::{Dispatch, compute_pipeline, dispatch, storage_entry, storage_texture_entry, texture_entry, uniform_entry};

/// Format of the cone tracing output.
pub const CONE_OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the G-buffer normal input.
pub const GBUFFER_NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the G-buffer linear depth input.
pub const GBUFFER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

const WORKGROUP: u32 = 8;

/// Traces six cones per output pixel through the octree bricks.
///
/// Bind groups:
/// - 0: node arena (read-only)
/// - 1: opacity and irradiance volumes
/// - 2: cone parameters
/// - 3: G-buffer normal and depth, output image
pub struct ConeTracePipeline {
    pipeline: wgpu::ComputePipeline,
    params_buffer: Arc<wgpu::Buffer>,
    octree_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    params_bind_group: wgpu::BindGroup,
    frame_layout: wgpu::BindGroupLayout,
}

impl ConeTracePipeline {
    pub fn new(device: &wgpu::Device, factory: &ResourceFactory) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("cone_trace_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_read.wgsl"),
                    include_str!("../../../shaders/cone_trace.wgsl"),
                )
                .into(),
            ),
        });

        let params_buffer = factory.buffer(
            "cone_trace_params",
            std::mem::size_of::<ConeTraceParams>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let compute = wgpu::ShaderStages::COMPUTE;
        let octree_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cone_trace_octree_layout"),
            entries: &[storage_entry(0, compute, true)],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cone_trace_volume_layout"),
            entries: &[
                texture_entry(0, compute, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D3),
                texture_entry(1, compute, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D3),
            ],
        });
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cone_trace_params_layout"),
            entries: &[uniform_entry::<ConeTraceParams>(0, compute, false)],
        });
        let unfiltered = wgpu::TextureSampleType::Float { filterable: false };
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cone_trace_frame_layout"),
            entries: &[
                texture_entry(0, compute, unfiltered, wgpu::TextureViewDimension::D2),
                texture_entry(1, compute, unfiltered, wgpu::TextureViewDimension::D2),
                storage_texture_entry(
                    2,
                    wgpu::StorageTextureAccess::WriteOnly,
                    CONE_OUTPUT_FORMAT,
                    wgpu::TextureViewDimension::D2,
                ),
            ],
        });

        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cone_trace_params_bind_group"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cone_trace_pipeline_layout"),
            bind_group_layouts: &[&octree_layout, &volume_layout, &params_layout, &frame_layout],
            immediate_size: 0,
        });
        let pipeline = compute_pipeline(device, "cone_trace_pipeline", &pipeline_layout, &shader, "trace_cones");

        Self {
            pipeline,
            params_buffer,
            octree_layout,
            volume_layout,
            params_bind_group,
            frame_layout,
        }
    }

    pub fn update_params(&self, queue: &wgpu::Queue, params: &ConeTraceParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    pub fn create_octree_bind_group(&self, device: &wgpu::Device, nodes: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cone_trace_octree_bind_group"),
            layout: &self.octree_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: nodes.as_entire_binding(),
            }],
        })
    }

    pub fn create_volume_bind_group(
        &self,
        device: &wgpu::Device,
        opacity: &wgpu::TextureView,
        irradiance: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cone_trace_volume_bind_group"),
            layout: &self.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(opacity),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(irradiance),
                },
            ],
        })
    }

    /// Bind group for one frame's G-buffer and the output image.
    pub fn create_frame_bind_group(
        &self,
        device: &wgpu::Device,
        normal: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cone_trace_frame_bind_group"),
            layout: &self.frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(normal),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(output),
                },
            ],
        })
    }

    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        octree: &wgpu::BindGroup,
        volumes: &wgpu::BindGroup,
        frame: &wgpu::BindGroup,
        output_size: [u32; 2],
    ) {
        dispatch(
            encoder,
            "cone_trace",
            &self.pipeline,
            &[
                (octree, NO_OFFSETS),
                (volumes, NO_OFFSETS),
                (&self.params_bind_group, NO_OFFSETS),
                (frame, NO_OFFSETS),
            ],
            Dispatch::Direct([
                output_size[0].div_ceil(WORKGROUP),
                output_size[1].div_ceil(WORKGROUP),
                1,
            ]),
        );
    }
}
