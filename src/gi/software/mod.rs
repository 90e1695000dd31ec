//! Host-memory backend
//!
//! Runs every pass sequentially with the same arithmetic as the compute
//! shaders. Allocation order is deterministic, so two builds of the same
//! scene produce byte-identical arenas. Used for tests, the headless tool
//! and machines without a suitable adapter.

pub mod cone;
pub mod raster;

use crate::core::config::VctConfig;
use crate::core::error::Error;
use crate::core::types::{Result, UVec2, UVec3, Vec3, Vec4};
use crate::gi::backend::GiBackend;
use crate::gi::params::{ConeTraceParams, DebugDrawMode, DebugDrawParams, LightParams};
use crate::scene::StaticMesh;
use crate::voxel::brick::{self, BRICK_SAMPLES};
use crate::voxel::fragment::{pack_rgba8, unpack_rgba8};
use crate::voxel::indirect::{self, FRAGMENT_SLOT, IndirectArgsRecord};
use crate::voxel::svo::{Face, NODE_FLAGGED, NODE_NULL, NodeIndex, traverse};
use crate::voxel::{Axis, BrickTarget, BrickVolume, OctreeNode, OctreeSnapshot, VoxelFragment, VoxelGrid};

pub use raster::{HostFrame, HostShadowMap};

/// One cube of the debug view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugCube {
    pub min: Vec3,
    pub size: f32,
    pub color: Vec4,
}

/// How often each pass ran since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub builds: u32,
    pub readbacks: u32,
    pub brick_clears: u32,
    pub injections: u32,
    pub lit_averages: u32,
    pub cone_traces: u32,
    pub submits: u32,
    /// Subdivisions dropped because the node arena was full
    pub dropped_subdivisions: u32,
    /// Fragments dropped because the fragment list was full
    pub dropped_fragments: u32,
}

pub struct SoftwareBackend {
    height: u32,
    node_capacity: u32,
    fragment_capacity: u32,
    grid: Option<VoxelGrid>,
    nodes: Vec<OctreeNode>,
    fragments: Vec<VoxelFragment>,
    records: Vec<IndirectArgsRecord>,
    pack_counter: u32,
    lit: Vec<u32>,
    opacity: BrickVolume,
    irradiance: BrickVolume,
    output: Vec<Vec4>,
    output_size: UVec2,
    stats: PassStats,
}

impl SoftwareBackend {
    pub fn new(config: &VctConfig) -> Result<Self> {
        config.validate()?;
        let node_capacity = config.node_capacity();
        log::debug!(
            "Software backend: {} nodes, {} fragments, {}^3 bricks",
            node_capacity,
            config.fragment_capacity,
            config.brick_buffer_res
        );

        Ok(Self {
            height: config.octree_height,
            node_capacity,
            fragment_capacity: config.fragment_capacity,
            grid: None,
            nodes: vec![OctreeNode::empty(); node_capacity as usize],
            fragments: vec![VoxelFragment::default(); config.fragment_capacity as usize],
            records: indirect::cleared_records(config.octree_height),
            pack_counter: 0,
            lit: vec![0; node_capacity as usize],
            opacity: BrickVolume::new(config.brick_buffer_res),
            irradiance: BrickVolume::new(config.brick_buffer_res),
            output: Vec::new(),
            output_size: UVec2::ZERO,
            stats: PassStats::default(),
        })
    }

    /// The whole node arena, including unallocated slots.
    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    /// Fragments kept by the last voxelization.
    pub fn fragments(&self) -> &[VoxelFragment] {
        &self.fragments[..self.fragment_count() as usize]
    }

    pub fn fragment_count(&self) -> u32 {
        self.records[FRAGMENT_SLOT as usize].count()
    }

    pub fn records(&self) -> &[IndirectArgsRecord] {
        &self.records
    }

    /// Per-leaf shadow texel hits of the last injection.
    pub fn lit(&self) -> &[u32] {
        &self.lit
    }

    pub fn bricks(&self, target: BrickTarget) -> &BrickVolume {
        match target {
            BrickTarget::Opacity => &self.opacity,
            BrickTarget::Irradiance => &self.irradiance,
        }
    }

    fn bricks_mut(&mut self, target: BrickTarget) -> &mut BrickVolume {
        match target {
            BrickTarget::Opacity => &mut self.opacity,
            BrickTarget::Irradiance => &mut self.irradiance,
        }
    }

    /// Last cone tracing result, row-major: rgb = indirect light,
    /// a = ambient visibility.
    pub fn output(&self) -> &[Vec4] {
        &self.output
    }

    pub fn output_size(&self) -> UVec2 {
        self.output_size
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// Copy of the first `node_count` nodes.
    pub fn snapshot(&self, node_count: u32) -> OctreeSnapshot {
        OctreeSnapshot::new(self.height, node_count, &self.nodes)
    }

    #[cfg(test)]
    pub(crate) fn nodes_mut(&mut self) -> &mut [OctreeNode] {
        &mut self.nodes
    }

    #[cfg(test)]
    pub(crate) fn fragments_mut(&mut self) -> &mut [VoxelFragment] {
        &mut self.fragments
    }

    #[cfg(test)]
    pub(crate) fn set_record(&mut self, slot: u32, record: IndirectArgsRecord) {
        self.records[slot as usize] = record;
    }

    #[cfg(test)]
    pub(crate) fn volume_mut(&mut self, target: BrickTarget) -> &mut BrickVolume {
        self.bricks_mut(target)
    }

    fn record(&self, slot: u32) -> IndirectArgsRecord {
        self.records[slot as usize]
    }

    fn level_record(&self, level: u32) -> IndirectArgsRecord {
        self.record(indirect::level_slot(level))
    }

    fn leaf_of(&self, voxel: UVec3) -> Option<NodeIndex> {
        traverse::descend(&self.nodes, voxel, self.height - 1, self.height)
    }

    fn live_fragments(&self) -> impl Iterator<Item = (u32, VoxelFragment)> + '_ {
        self.record(FRAGMENT_SLOT)
            .range()
            .filter_map(|i| self.fragments.get(i as usize).map(|f| (i, *f)))
    }
}

impl GiBackend for SoftwareBackend {
    type Geometry = StaticMesh;
    type ShadowMap = HostShadowMap;
    type Frame = HostFrame;
    type DebugTarget = Vec<DebugCube>;

    fn clear_octree(&mut self) -> Result<()> {
        self.nodes.fill(OctreeNode::empty());
        self.lit.fill(0);
        self.pack_counter = 0;
        self.records = indirect::cleared_records(self.height);
        Ok(())
    }

    fn voxelize(&mut self, geometry: &[StaticMesh], grid: &VoxelGrid) -> Result<()> {
        if grid.height() != self.height {
            return Err(Error::Voxel(format!(
                "grid height {} does not match octree height {}",
                grid.height(),
                self.height
            )));
        }
        self.grid = Some(*grid);
        self.stats.builds += 1;

        let capacity = self.fragment_capacity;
        let fragments = &mut self.fragments;
        let mut emitted = 0u32;
        raster::voxelize_meshes(geometry, grid, |fragment| {
            if let Some(slot) = fragments.get_mut(emitted as usize) {
                *slot = fragment;
            }
            emitted = emitted.saturating_add(1);
        });

        let kept = emitted.min(capacity);
        if emitted > capacity {
            self.stats.dropped_fragments += emitted - capacity;
            log::warn!("Fragment list full: kept {} of {} fragments", capacity, emitted);
        }
        self.records[FRAGMENT_SLOT as usize] = IndirectArgsRecord::for_count(kept, 0);
        log::debug!("Voxelized {} fragments", kept);
        Ok(())
    }

    fn flag_nodes(&mut self, level: u32) -> Result<()> {
        for (_, fragment) in self.live_fragments().collect::<Vec<_>>() {
            if let Some(node) = traverse::descend(&self.nodes, fragment.voxel(), level, self.height) {
                self.nodes[node.as_usize()].child = NODE_FLAGGED;
            }
        }
        Ok(())
    }

    fn subdivide_nodes(&mut self, level: u32) -> Result<()> {
        let current = self.level_record(level);
        let first = 1 + self.pack_counter * 8;

        for node in current.range() {
            let Some(n) = self.nodes.get(node as usize) else { continue };
            if !n.is_flagged() {
                continue;
            }
            let base = 1 + self.pack_counter * 8;
            self.pack_counter += 1;
            if base + 8 > self.node_capacity {
                self.nodes[node as usize].child = NODE_NULL;
                self.stats.dropped_subdivisions += 1;
                continue;
            }
            self.nodes[base as usize..base as usize + 8].fill(OctreeNode::empty());
            self.nodes[node as usize].child = base;
        }

        let end = (1 + self.pack_counter * 8).min(self.node_capacity);
        let count = end.saturating_sub(first);
        self.records[indirect::level_slot(level + 1) as usize] = IndirectArgsRecord::for_count(count, first);
        Ok(())
    }

    fn connect_neighbors(&mut self, level: u32) -> Result<()> {
        for node in self.level_record(level).range() {
            let Some(parent) = self.nodes.get(node as usize).copied() else { continue };
            let Some(base) = parent.children() else { continue };
            for octant in 0..8 {
                let links = Face::ALL.map(|face| traverse::child_neighbor(&self.nodes, &parent, base, octant, face));
                self.nodes[base.offset(octant).as_usize()].neighbors = links;
            }
        }
        Ok(())
    }

    fn connect_nodes_to_voxels(&mut self) -> Result<()> {
        for (i, fragment) in self.live_fragments().collect::<Vec<_>>() {
            if let Some(leaf) = self.leaf_of(fragment.voxel()) {
                let data = &mut self.nodes[leaf.as_usize()].data;
                *data = (*data).max(i + 1);
            }
        }
        Ok(())
    }

    fn read_node_pack_counter(&mut self) -> Result<u32> {
        self.stats.readbacks += 1;
        Ok(self.pack_counter)
    }

    fn clear_brick_buffer(&mut self, target: BrickTarget) -> Result<()> {
        self.stats.brick_clears += 1;
        self.bricks_mut(target).clear();
        Ok(())
    }

    fn construct_opacity(&mut self) -> Result<()> {
        for (_, fragment) in self.live_fragments().collect::<Vec<_>>() {
            let voxel = fragment.voxel();
            let Some(leaf) = self.leaf_of(voxel) else { continue };
            let color = (fragment.color & 0x00FF_FFFF) | 0xFF00_0000;
            let v = voxel & UVec3::ONE;
            for c in 0..8u32 {
                let corner = UVec3::new(c & 1, (c >> 1) & 1, (c >> 2) & 1);
                self.opacity.store(leaf.get(), v + corner, color);
            }
        }
        Ok(())
    }

    fn gather_from_low_level(&mut self, target: BrickTarget, level: u32) -> Result<()> {
        let record = self.level_record(level);
        for node in record.range() {
            let Some(base) = self.nodes.get(node as usize).and_then(OctreeNode::children) else {
                continue;
            };
            let volume = self.bricks_mut(target);
            for p in 0..BRICK_SAMPLES {
                let q = brick::sample_coord(p);
                let samples: [u32; 8] =
                    std::array::from_fn(|o| volume.load(base.offset(o as u32).get(), brick::gather_source(q, o as u32)));
                volume.store(node, q, brick::rounded_mean(&samples));
            }
        }
        Ok(())
    }

    fn average_along_axis(&mut self, target: BrickTarget, axis: Axis, level: u32) -> Result<()> {
        let face = Face::ALL[axis.index() * 2];
        let height = self.height;
        for node in self.level_record(level).range() {
            let Some(n) = self.nodes.get(node as usize).copied() else { continue };
            if !n.has_content(level, height) {
                continue;
            }
            let Some(neighbor) = n.neighbor(face) else { continue };
            let has_neighbor = self
                .nodes
                .get(neighbor.as_usize())
                .is_some_and(|m| m.has_content(level, height));
            if !has_neighbor {
                continue;
            }

            let volume = self.bricks_mut(target);
            for a in 0..3 {
                for b in 0..3 {
                    let high = brick::face_sample(axis, 2, a, b);
                    let low = brick::face_sample(axis, 0, a, b);
                    let mean = brick::rounded_mean(&[volume.load(node, high), volume.load(neighbor.get(), low)]);
                    volume.store(node, high, mean);
                    volume.store(neighbor.get(), low, mean);
                }
            }
        }
        Ok(())
    }

    fn reset_node_light(&mut self) -> Result<()> {
        self.lit.fill(0);
        Ok(())
    }

    fn inject_shadow_map(&mut self, shadow: &HostShadowMap, light: &LightParams) -> Result<()> {
        let grid = self
            .grid
            .ok_or_else(|| Error::Voxel("shadow map injected before voxelization".into()))?;
        let inv_view_proj = glam::Mat4::from_cols_array_2d(&light.inv_view_proj);
        self.stats.injections += 1;

        for y in 0..shadow.height {
            for x in 0..shadow.width {
                let depth = shadow.depth[(y * shadow.width + x) as usize];
                if depth >= 1.0 {
                    continue;
                }
                let ndc = raster::pixel_ndc(x, y, shadow.width, shadow.height);
                let world = inv_view_proj.project_point3(ndc.extend(depth));
                let Some(voxel) = grid.voxel_of(world) else { continue };
                if let Some(leaf) = self.leaf_of(voxel) {
                    self.lit[leaf.as_usize()] += 1;
                }
            }
        }
        Ok(())
    }

    fn average_lit_node_values(&mut self, light: &LightParams) -> Result<()> {
        self.stats.lit_averages += 1;
        let direction = light.light_direction();
        let color = light.light_color();
        let record = self.level_record(self.height - 1);

        for node in record.range() {
            let Some(fragment) = self
                .nodes
                .get(node as usize)
                .and_then(OctreeNode::fragment)
                .and_then(|f| self.fragments.get(f as usize))
                .copied()
            else {
                continue;
            };
            let coverage = (self.lit[node as usize] as f32 / light.texels_per_leaf()).min(1.0);
            let ndotl = fragment.normal().dot(-direction).max(0.0);
            let rgb = color * fragment.albedo().truncate() * ndotl * coverage;
            let value = pack_rgba8(Vec4::from((rgb, coverage)));

            for p in 0..BRICK_SAMPLES {
                let q = brick::sample_coord(p);
                if self.opacity.load(node, q) >> 24 != 0 {
                    self.irradiance.store(node, q, value);
                }
            }
        }
        Ok(())
    }

    fn trace_cones(&mut self, frame: &HostFrame, params: &ConeTraceParams) -> Result<()> {
        let size = UVec2::from(params.output_size);
        if size.min_element() == 0 || frame.width == 0 || frame.height == 0 {
            return Err(Error::Voxel(format!("cannot trace into a {}x{} output", size.x, size.y)));
        }
        self.stats.cone_traces += 1;
        self.output.resize((size.x * size.y) as usize, Vec4::ZERO);
        self.output_size = size;

        let volume = cone::ConeVolume {
            nodes: &self.nodes,
            opacity: &self.opacity,
            irradiance: &self.irradiance,
        };
        cone::trace_frame(&volume, params, frame, &mut self.output);
        Ok(())
    }

    fn draw_debug(&mut self, target: &mut Vec<DebugCube>, params: &DebugDrawParams) -> Result<()> {
        let voxel_size = params.world_min[3];
        let origin = Vec3::new(params.world_min[0], params.world_min[1], params.world_min[2]);
        let mode = params.draw_mode();
        let volume = self.bricks(params.target());
        target.clear();

        for (_, fragment) in self.live_fragments() {
            let voxel = fragment.voxel();
            let cube = match mode {
                DebugDrawMode::Voxels => DebugCube {
                    min: origin + voxel.as_vec3() * voxel_size,
                    size: voxel_size,
                    color: fragment.albedo(),
                },
                DebugDrawMode::Bricks => {
                    let Some(node) = traverse::descend(&self.nodes, voxel, params.level, params.height) else {
                        continue;
                    };
                    let min_voxel = traverse::node_min_voxel(voxel, params.level, params.height);
                    DebugCube {
                        min: origin + min_voxel.as_vec3() * voxel_size,
                        size: traverse::node_span(params.level, params.height) as f32 * voxel_size,
                        color: unpack_rgba8(volume.load(node.get(), UVec3::ONE)),
                    }
                }
            };
            if cube.color.w > 0.0 {
                target.push(cube);
            }
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.stats.submits += 1;
        Ok(())
    }
}
