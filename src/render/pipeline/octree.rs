//! Octree build pipelines: flag, subdivide, connect
//!
//! Every per-element pass is dispatched indirectly from the record the
//! previous pass wrote. Allocation ranges are bracketed by two
//! single-thread passes that snapshot the subdivision counter before and
//! after `subdivide_nodes`, so level `L + 1` is exactly the nodes
//! allocated while subdividing level `L`.

use crate::gi::params::OctreeParams;
use crate::voxel::indirect::{self, FRAGMENT_SLOT};

use super::{Dispatch, UniformSlots, compute_pipeline, dispatch, storage_entry, uniform_entry};

pub(crate) const NO_OFFSETS: &[u32] = &[];

/// Bind group layouts shared by the build, brick and light passes.
///
/// - group 0: node arena, fragments, subdivision counter, lit counters
/// - group 1: indirect records (read-only, or writable for record passes)
/// - group 2: `OctreeParams` at a dynamic slot offset
pub struct SvoBindings {
    pub svo_layout: wgpu::BindGroupLayout,
    pub records_layout: wgpu::BindGroupLayout,
    pub records_rw_layout: wgpu::BindGroupLayout,
    pub params_layout: wgpu::BindGroupLayout,
}

/// Bind groups matching [`SvoBindings`].
pub struct SvoBindGroups {
    pub svo: wgpu::BindGroup,
    pub records: wgpu::BindGroup,
    pub records_rw: wgpu::BindGroup,
    pub params: wgpu::BindGroup,
}

/// Buffers the shared bind groups are built from.
pub struct SvoBuffers<'a> {
    pub nodes: &'a wgpu::Buffer,
    pub fragments: &'a wgpu::Buffer,
    pub pack_counter: &'a wgpu::Buffer,
    pub lit: &'a wgpu::Buffer,
    pub records: &'a wgpu::Buffer,
    pub params: &'a UniformSlots,
}

impl SvoBindings {
    pub fn new(device: &wgpu::Device) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;
        let svo_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("svo_layout"),
            entries: &[
                storage_entry(0, compute, false),
                storage_entry(1, compute, true),
                storage_entry(2, compute, false),
                storage_entry(3, compute, false),
            ],
        });
        let records_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("records_layout"),
            entries: &[storage_entry(0, compute, true)],
        });
        let records_rw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("records_rw_layout"),
            entries: &[storage_entry(0, compute, false)],
        });
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("octree_params_layout"),
            entries: &[uniform_entry::<OctreeParams>(0, compute, true)],
        });

        Self {
            svo_layout,
            records_layout,
            records_rw_layout,
            params_layout,
        }
    }

    pub fn create_bind_groups(&self, device: &wgpu::Device, buffers: &SvoBuffers<'_>) -> SvoBindGroups {
        let svo = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("svo_bind_group"),
            layout: &self.svo_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.fragments.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.pack_counter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.lit.as_entire_binding(),
                },
            ],
        });
        let records_entry = [wgpu::BindGroupEntry {
            binding: 0,
            resource: buffers.records.as_entire_binding(),
        }];
        let records = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("records_bind_group"),
            layout: &self.records_layout,
            entries: &records_entry,
        });
        let records_rw = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("records_rw_bind_group"),
            layout: &self.records_rw_layout,
            entries: &records_entry,
        });
        let params = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("octree_params_bind_group"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffers.params.binding::<OctreeParams>(),
            }],
        });

        SvoBindGroups {
            svo,
            records,
            records_rw,
            params,
        }
    }

    /// Layout for passes reading records, plus any pass-specific groups.
    pub(crate) fn pipeline_layout(
        &self,
        device: &wgpu::Device,
        label: &str,
        writes_records: bool,
        extra: &[&wgpu::BindGroupLayout],
    ) -> wgpu::PipelineLayout {
        let records = if writes_records {
            &self.records_rw_layout
        } else {
            &self.records_layout
        };
        let mut layouts = vec![&self.svo_layout, records, &self.params_layout];
        layouts.extend_from_slice(extra);
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layouts,
            immediate_size: 0,
        })
    }
}

impl SvoBindGroups {
    /// Groups 0..=2 for a pass at `params_offset`.
    pub(crate) fn bound<'a>(&'a self, params_offset: &'a [u32], writes_records: bool) -> [(&'a wgpu::BindGroup, &'a [u32]); 3] {
        let records = if writes_records { &self.records_rw } else { &self.records };
        [(&self.svo, NO_OFFSETS), (records, NO_OFFSETS), (&self.params, params_offset)]
    }
}

/// Build passes over the node arena.
pub struct OctreePipelines {
    begin_level: wgpu::ComputePipeline,
    end_level: wgpu::ComputePipeline,
    finalize_fragments: wgpu::ComputePipeline,
    flag_nodes: wgpu::ComputePipeline,
    subdivide_nodes: wgpu::ComputePipeline,
    connect_neighbors: wgpu::ComputePipeline,
    connect_voxels: wgpu::ComputePipeline,
}

impl OctreePipelines {
    pub fn new(device: &wgpu::Device, bindings: &SvoBindings) -> Self {
        let record_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("indirect_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_bindings.wgsl"),
                    include_str!("../../../shaders/indirect.wgsl"),
                )
                .into(),
            ),
        });
        let build_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("octree_shader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../../shaders/common.wgsl"),
                    include_str!("../../../shaders/svo_bindings.wgsl"),
                    include_str!("../../../shaders/octree.wgsl"),
                )
                .into(),
            ),
        });

        let record_layout = bindings.pipeline_layout(device, "indirect_pipeline_layout", true, &[]);
        let build_layout = bindings.pipeline_layout(device, "octree_pipeline_layout", false, &[]);

        Self {
            begin_level: compute_pipeline(device, "begin_level_pipeline", &record_layout, &record_shader, "begin_level"),
            end_level: compute_pipeline(device, "end_level_pipeline", &record_layout, &record_shader, "end_level"),
            finalize_fragments: compute_pipeline(
                device,
                "finalize_fragments_pipeline",
                &record_layout,
                &record_shader,
                "finalize_fragments",
            ),
            flag_nodes: compute_pipeline(device, "flag_nodes_pipeline", &build_layout, &build_shader, "flag_nodes"),
            subdivide_nodes: compute_pipeline(
                device,
                "subdivide_nodes_pipeline",
                &build_layout,
                &build_shader,
                "subdivide_nodes",
            ),
            connect_neighbors: compute_pipeline(
                device,
                "connect_neighbors_pipeline",
                &build_layout,
                &build_shader,
                "connect_neighbors",
            ),
            connect_voxels: compute_pipeline(
                device,
                "connect_voxels_pipeline",
                &build_layout,
                &build_shader,
                "connect_voxels",
            ),
        }
    }

    /// Clamp the rasterizer's fragment counter into record 0.
    pub fn finalize_fragments(&self, encoder: &mut wgpu::CommandEncoder, groups: &SvoBindGroups, params_offset: u32) {
        let offsets = [params_offset];
        dispatch(
            encoder,
            "finalize_fragments",
            &self.finalize_fragments,
            &groups.bound(&offsets, true),
            Dispatch::Direct([1, 1, 1]),
        );
    }

    pub fn flag_nodes(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        params_offset: u32,
        records: &wgpu::Buffer,
    ) {
        let offsets = [params_offset];
        dispatch(
            encoder,
            "flag_nodes",
            &self.flag_nodes,
            &groups.bound(&offsets, false),
            fragment_dispatch(records),
        );
    }

    /// Allocate children for the flagged nodes of `level` and write the
    /// record of `level + 1`.
    pub fn subdivide_nodes(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        params_offset: u32,
        records: &wgpu::Buffer,
        level: u32,
    ) {
        let offsets = [params_offset];
        dispatch(
            encoder,
            "begin_level",
            &self.begin_level,
            &groups.bound(&offsets, true),
            Dispatch::Direct([1, 1, 1]),
        );
        dispatch(
            encoder,
            "subdivide_nodes",
            &self.subdivide_nodes,
            &groups.bound(&offsets, false),
            level_dispatch(records, level),
        );
        dispatch(
            encoder,
            "end_level",
            &self.end_level,
            &groups.bound(&offsets, true),
            Dispatch::Direct([1, 1, 1]),
        );
    }

    pub fn connect_neighbors(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        params_offset: u32,
        records: &wgpu::Buffer,
        level: u32,
    ) {
        let offsets = [params_offset];
        dispatch(
            encoder,
            "connect_neighbors",
            &self.connect_neighbors,
            &groups.bound(&offsets, false),
            level_dispatch(records, level),
        );
    }

    pub fn connect_voxels(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        groups: &SvoBindGroups,
        params_offset: u32,
        records: &wgpu::Buffer,
    ) {
        let offsets = [params_offset];
        dispatch(
            encoder,
            "connect_voxels",
            &self.connect_voxels,
            &groups.bound(&offsets, false),
            fragment_dispatch(records),
        );
    }
}

/// One thread per fragment.
pub(crate) fn fragment_dispatch(records: &wgpu::Buffer) -> Dispatch<'_> {
    Dispatch::Indirect {
        buffer: records,
        offset: indirect::slot_offset(FRAGMENT_SLOT),
    }
}

/// One thread per node of `level`.
pub(crate) fn level_dispatch(records: &wgpu::Buffer, level: u32) -> Dispatch<'_> {
    Dispatch::Indirect {
        buffer: records,
        offset: indirect::indirect_args_offset(level),
    }
}
