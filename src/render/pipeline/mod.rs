//! Compute and render pipelines of the voxel cone tracing passes
//!
//! Pass shaders share `common.wgsl`, and the build, brick and light passes
//! also share the octree bindings in `svo_bindings.wgsl`. Each pipeline
//! concatenates the pieces it needs at compile time.

pub mod bricks;
pub mod cone_trace;
pub mod debug_draw;
pub mod light;
pub mod octree;
pub mod voxelize;

pub use bricks::BrickPipelines;
pub use cone_trace::ConeTracePipeline;
pub use debug_draw::{DEBUG_COLOR_FORMAT, DEBUG_DEPTH_FORMAT, DebugDrawPipeline};
pub use light::LightPipelines;
pub use octree::{OctreePipelines, SvoBindings};
pub use voxelize::VoxelizePipeline;

use std::num::NonZeroU64;
use std::sync::Arc;

use crate::gi::params::UNIFORM_SLOT_STRIDE;
use crate::render::resources::ResourceFactory;

/// Storage buffer layout entry.
pub(crate) fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Uniform layout entry sized for `T`. Dynamic entries index a
/// [`UniformSlots`] buffer.
pub(crate) fn uniform_entry<T>(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

/// Unfiltered sampled texture layout entry.
pub(crate) fn texture_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    sample_type: wgpu::TextureSampleType,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn storage_texture_entry(
    binding: u32,
    access: wgpu::StorageTextureAccess,
    format: wgpu::TextureFormat,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format,
            view_dimension,
        },
        count: None,
    }
}

pub(crate) fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// How a compute pass sizes its grid.
pub(crate) enum Dispatch<'a> {
    Direct([u32; 3]),
    /// Workgroup counts read from an indirect record on the GPU
    Indirect { buffer: &'a wgpu::Buffer, offset: u64 },
}

/// Record one compute pass with `bind_groups` bound to groups 0.. in order.
pub(crate) fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: &[(&wgpu::BindGroup, &[u32])],
    size: Dispatch<'_>,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    for (index, (group, offsets)) in bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, *group, offsets);
    }
    match size {
        Dispatch::Direct([x, y, z]) => pass.dispatch_workgroups(x, y, z),
        Dispatch::Indirect { buffer, offset } => pass.dispatch_workgroups_indirect(buffer, offset),
    }
}

/// Uniform buffer of fixed-stride slots bound with dynamic offsets, so one
/// encoder can record several passes with different parameters.
pub struct UniformSlots {
    buffer: Arc<wgpu::Buffer>,
    slots: u32,
}

impl UniformSlots {
    pub fn new(factory: &ResourceFactory, label: &str, slots: u32) -> Self {
        let slots = slots.max(1);
        let buffer = factory.buffer(
            label,
            UNIFORM_SLOT_STRIDE * slots as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        Self { buffer, slots }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Write `value` into `slot` and return the dynamic offset to bind.
    pub fn write<T: bytemuck::Pod>(&self, queue: &wgpu::Queue, slot: u32, value: &T) -> u32 {
        debug_assert!(std::mem::size_of::<T>() as u64 <= UNIFORM_SLOT_STRIDE);
        let slot = slot.min(self.slots - 1);
        let offset = slot as u64 * UNIFORM_SLOT_STRIDE;
        queue.write_buffer(&self.buffer, offset, bytemuck::bytes_of(value));
        offset as u32
    }

    /// Binding of one slot sized for `T`.
    pub fn binding<T>(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
        })
    }
}
