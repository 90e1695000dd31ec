//! Brick construction and filtering pipelines
//!
//! The same pipelines run on either brick volume; the target is the bind
//! group at slot 3.

use crate::core::types::UVec3;
use crate::render::context::BRICK_FORMAT;
use crate::voxel::Axis;

use super::octree::{NO_OFFSETS, SvoBindGroups, SvoBindings, fragment_dispatch, level_dispatch};
use super::{Dispatch, compute_pipeline, dispatch, storage_texture_entry};

/// Workgroup edge of the clear pass.
const CLEAR_WORKGROUP: u32 = 4;

pub struct BrickPipelines {
    target_layout: wgpu::BindGroupLayout,
    clear: wgpu::ComputePipeline,
    construct_opacity: wgpu::ComputePipeline,
    gather: wgpu::ComputePipeline,
    average: [wgpu::ComputePipeline; 3],
}

impl BrickPipelines {
    pub fn new(device: &wgpu::Device, bindings: &SvoBindings) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("bricks_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_bindings.wgsl"),
                    include_str!("../../../shaders/bricks.wgsl"),
                )
                .into(),
            ),
        });

        // Bind group 3: the brick volume being written
        let target_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("brick_target_layout"),
            entries: &[storage_texture_entry(
                0,
                wgpu::StorageTextureAccess::ReadWrite,
                BRICK_FORMAT,
                wgpu::TextureViewDimension::D3,
            )],
        });
        let layout = bindings.pipeline_layout(device, "bricks_pipeline_layout", false, &[&target_layout]);

        Self {
            clear: compute_pipeline(device, "clear_bricks_pipeline", &layout, &shader, "clear_bricks"),
            construct_opacity: compute_pipeline(
                device,
                "construct_opacity_pipeline",
                &layout,
                &shader,
                "construct_opacity",
            ),
            gather: compute_pipeline(device, "gather_pipeline", &layout, &shader, "gather_from_low_level"),
            average: [
                compute_pipeline(device, "average_x_pipeline", &layout, &shader, "average_x"),
                compute_pipeline(device, "average_y_pipeline", &layout, &shader, "average_y"),
                compute_pipeline(device, "average_z_pipeline", &layout, &shader, "average_z"),
            ],
            target_layout,
        }
    }

    /// Bind group writing into `volume`.
    pub fn create_target_bind_group(&self, device: &wgpu::Device, volume: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("brick_target_bind_group"),
            layout: &self.target_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(volume),
            }],
        })
    }

    pub fn clear(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        target: &wgpu::BindGroup,
        params_offset: u32,
        brick_res: u32,
    ) {
        let offsets = [params_offset];
        let [svo, records, params] = groups.bound(&offsets, false);
        let workgroups = UVec3::splat(brick_res.div_ceil(CLEAR_WORKGROUP));
        dispatch(
            encoder,
            "clear_bricks",
            &self.clear,
            &[svo, records, params, (target, NO_OFFSETS)],
            Dispatch::Direct(workgroups.to_array()),
        );
    }

    pub fn construct_opacity(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        target: &wgpu::BindGroup,
        params_offset: u32,
        records: &wgpu::Buffer,
    ) {
        let offsets = [params_offset];
        let [svo, records_group, params] = groups.bound(&offsets, false);
        dispatch(
            encoder,
            "construct_opacity",
            &self.construct_opacity,
            &[svo, records_group, params, (target, NO_OFFSETS)],
            fragment_dispatch(records),
        );
    }

    pub fn gather(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        target: &wgpu::BindGroup,
        params_offset: u32,
        records: &wgpu::Buffer,
        level: u32,
    ) {
        let offsets = [params_offset];
        let [svo, records_group, params] = groups.bound(&offsets, false);
        dispatch(
            encoder,
            "gather_from_low_level",
            &self.gather,
            &[svo, records_group, params, (target, NO_OFFSETS)],
            level_dispatch(records, level),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn average(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        target: &wgpu::BindGroup,
        params_offset: u32,
        records: &wgpu::Buffer,
        axis: Axis,
        level: u32,
    ) {
        let offsets = [params_offset];
        let [svo, records_group, params] = groups.bound(&offsets, false);
        dispatch(
            encoder,
            "average_along_axis",
            &self.average[axis.index()],
            &[svo, records_group, params, (target, NO_OFFSETS)],
            level_dispatch(records, level),
        );
    }
}
