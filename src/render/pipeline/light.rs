//! Shadow map injection and lit-value averaging

use std::sync::Arc;

use crate::gi::params::LightParams;
use crate::render::context::BRICK_FORMAT;
use crate::render::resources::ResourceFactory;

use super::octree::{NO_OFFSETS, SvoBindGroups, SvoBindings, level_dispatch};
use super::{Dispatch, compute_pipeline, dispatch, storage_texture_entry, texture_entry, uniform_entry};

/// Workgroup edge of the injection pass.
const INJECT_WORKGROUP: u32 = 8;

pub struct LightPipelines {
    inject: wgpu::ComputePipeline,
    average_lit: wgpu::ComputePipeline,
    params_buffer: Arc<wgpu::Buffer>,
    light_layout: wgpu::BindGroupLayout,
}

/// Views bound for the light passes.
pub struct LightViews<'a> {
    pub irradiance: &'a wgpu::TextureView,
    pub opacity: &'a wgpu::TextureView,
    /// `R32Float` light-space depth
    pub shadow_depth: &'a wgpu::TextureView,
}

impl LightPipelines {
    pub fn new(device: &wgpu::Device, factory: &ResourceFactory, bindings: &SvoBindings) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("light_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_bindings.wgsl"),
                    include_str!("../../../shaders/light.wgsl"),
                )
                .into(),
            ),
        });

        let params_buffer = factory.buffer(
            "light_params",
            std::mem::size_of::<LightParams>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        // Bind group 3: irradiance target, opacity, shadow depth, light
        let light_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("light_layout"),
            entries: &[
                storage_texture_entry(
                    0,
                    wgpu::StorageTextureAccess::ReadWrite,
                    BRICK_FORMAT,
                    wgpu::TextureViewDimension::D3,
                ),
                texture_entry(
                    1,
                    wgpu::ShaderStages::COMPUTE,
                    wgpu::TextureSampleType::Uint,
                    wgpu::TextureViewDimension::D3,
                ),
                texture_entry(
                    2,
                    wgpu::ShaderStages::COMPUTE,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                ),
                uniform_entry::<LightParams>(3, wgpu::ShaderStages::COMPUTE, false),
            ],
        });
        let layout = bindings.pipeline_layout(device, "light_pipeline_layout", false, &[&light_layout]);

        Self {
            inject: compute_pipeline(device, "inject_shadow_map_pipeline", &layout, &shader, "inject_shadow_map"),
            average_lit: compute_pipeline(device, "average_lit_pipeline", &layout, &shader, "average_lit"),
            params_buffer,
            light_layout,
        }
    }

    pub fn update_params(&self, queue: &wgpu::Queue, params: &LightParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    pub fn create_light_bind_group(&self, device: &wgpu::Device, views: &LightViews<'_>) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("light_bind_group"),
            layout: &self.light_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(views.irradiance),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(views.opacity),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(views.shadow_depth),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// One thread per shadow texel.
    pub fn inject(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        light: &wgpu::BindGroup,
        params_offset: u32,
        shadow_size: [u32; 2],
    ) {
        let offsets = [params_offset];
        let [svo, records, params] = groups.bound(&offsets, false);
        dispatch(
            encoder,
            "inject_shadow_map",
            &self.inject,
            &[svo, records, params, (light, NO_OFFSETS)],
            Dispatch::Direct([
                shadow_size[0].div_ceil(INJECT_WORKGROUP),
                shadow_size[1].div_ceil(INJECT_WORKGROUP),
                1,
            ]),
        );
    }

    /// One thread per leaf.
    pub fn average_lit(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        light: &wgpu::BindGroup,
        params_offset: u32,
        records: &wgpu::Buffer,
        leaf_level: u32,
    ) {
        let offsets = [params_offset];
        let [svo, records_group, params] = groups.bound(&offsets, false);
        dispatch(
            encoder,
            "average_lit_node_values",
            &self.average_lit,
            &[svo, records_group, params, (light, NO_OFFSETS)],
            level_dispatch(records, leaf_level),
        );
    }
}
