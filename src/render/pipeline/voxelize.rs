//! Three-axis rasterization of static geometry into voxel fragments

use crate::gi::params::VoxelizeParams;
use crate::scene::MeshVertex;

use super::{UniformSlots, storage_entry, uniform_entry};

/// Format of the attachment the voxelizer renders into. Nothing is written
/// to it; it only sizes the viewport.
pub const VOXELIZE_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Per-axis vertex buffers of one mesh, de-indexed and binned by the
/// dominant axis of each triangle.
pub struct AxisVertexBuffers<'a> {
    pub buffers: [&'a wgpu::Buffer; 3],
    pub counts: [u32; 3],
}

pub struct VoxelizePipeline {
    pipeline: wgpu::RenderPipeline,
    storage_layout: wgpu::BindGroupLayout,
    params_layout: wgpu::BindGroupLayout,
}

impl VoxelizePipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("voxelize_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/voxelize.wgsl"),
                )
                .into(),
            ),
        });

        let fragment = wgpu::ShaderStages::FRAGMENT;
        let storage_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize_storage_layout"),
            entries: &[storage_entry(0, fragment, false), storage_entry(1, fragment, false)],
        });
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize_params_layout"),
            entries: &[uniform_entry::<VoxelizeParams>(
                0,
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                true,
            )],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("voxelize_pipeline_layout"),
            bind_group_layouts: &[&storage_layout, &params_layout],
            immediate_size: 0,
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // normal
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // color
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("voxelize_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: VOXELIZE_TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        Self {
            pipeline,
            storage_layout,
            params_layout,
        }
    }

    pub fn create_bind_groups(
        &self,
        device: &wgpu::Device,
        fragments: &wgpu::Buffer,
        records: &wgpu::Buffer,
        params: &UniformSlots,
    ) -> [wgpu::BindGroup; 2] {
        let storage = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxelize_storage_bind_group"),
            layout: &self.storage_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: fragments.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: records.as_entire_binding(),
                },
            ],
        });
        let params = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxelize_params_bind_group"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params.binding::<VoxelizeParams>(),
            }],
        });
        [storage, params]
    }

    /// One render pass per axis, each drawing only the triangles binned to
    /// that axis. `axis_offsets` are the dynamic offsets of the per-axis
    /// parameter slots.
    pub fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        bind_groups: &[wgpu::BindGroup; 2],
        axis_offsets: [u32; 3],
        meshes: &[AxisVertexBuffers<'_>],
    ) {
        for (axis, offset) in axis_offsets.into_iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("voxelize_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Discard,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_groups[0], &[]);
            pass.set_bind_group(1, &bind_groups[1], &[offset]);
            for mesh in meshes {
                let count = mesh.counts[axis];
                if count == 0 {
                    continue;
                }
                pass.set_vertex_buffer(0, mesh.buffers[axis].slice(..));
                pass.draw(0..count, 0..1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_attributes_match_mesh_vertex() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 40);
        assert_eq!(std::mem::offset_of!(MeshVertex, position), 0);
        assert_eq!(std::mem::offset_of!(MeshVertex, normal), 12);
        assert_eq!(std::mem::offset_of!(MeshVertex, color), 24);
    }
}
