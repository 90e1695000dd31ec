//! Pass-level interface between the orchestrator and an execution backend
//!
//! The orchestrator only sequences passes; it never sees node counts except
//! through the single [`GiBackend::read_node_pack_counter`] readback. Every
//! per-level pass reads its element count from the indirect record the
//! previous pass wrote, on whichever device the backend runs.

use std::sync::Arc;

use crate::core::types::{Mat4, Result, UVec2};
use crate::gi::params::{ConeTraceParams, DebugDrawParams, LightParams};
use crate::render::resources::ResourceRegistry;
use crate::scene::CameraMatrices;
use crate::voxel::{Axis, BrickTarget, VoxelGrid};

/// Depth-only shadow map of the directional light.
pub trait ShadowMapSource {
    /// Light view-projection the depth was rendered with.
    fn view_proj(&self) -> Mat4;
    fn size(&self) -> UVec2;
}

/// Deferred G-buffer of the current frame.
pub trait FrameSource {
    fn camera(&self) -> &CameraMatrices;
    fn size(&self) -> UVec2;
}

/// Executes the individual voxel cone tracing passes.
pub trait GiBackend {
    /// One static geometry submission.
    type Geometry;
    type ShadowMap: ShadowMapSource;
    type Frame: FrameSource;
    /// Where the debug draw lands.
    type DebugTarget;

    /// Zero nodes, counters and lit accumulators; reset indirect records to
    /// a lone root.
    fn clear_octree(&mut self) -> Result<()>;

    /// Rasterize all geometry into the fragment list and finalize the
    /// fragment record.
    fn voxelize(&mut self, geometry: &[Self::Geometry], grid: &VoxelGrid) -> Result<()>;

    /// Per fragment: flag its node at `level` for subdivision.
    fn flag_nodes(&mut self, level: u32) -> Result<()>;

    /// Per flagged node at `level`: allocate 8 children and write the
    /// record of `level + 1`.
    fn subdivide_nodes(&mut self, level: u32) -> Result<()>;

    /// Per node at `level`: link the 6 face neighbors of its children.
    fn connect_neighbors(&mut self, level: u32) -> Result<()>;

    /// Per fragment: attach a representative fragment to its leaf.
    fn connect_nodes_to_voxels(&mut self) -> Result<()>;

    /// Blocking readback of the subdivision counter.
    fn read_node_pack_counter(&mut self) -> Result<u32>;

    fn clear_brick_buffer(&mut self, target: BrickTarget) -> Result<()>;

    /// Per fragment: write albedo and full alpha into its leaf brick.
    fn construct_opacity(&mut self) -> Result<()>;

    /// Per node at `level`: pull its children's samples into its brick.
    fn gather_from_low_level(&mut self, target: BrickTarget, level: u32) -> Result<()>;

    /// Per node at `level`: average its `+axis` face with its neighbor's.
    fn average_along_axis(&mut self, target: BrickTarget, axis: Axis, level: u32) -> Result<()>;

    /// Zero the per-leaf lit accumulators.
    fn reset_node_light(&mut self) -> Result<()>;

    /// Per shadow texel: count a lit hit on the enclosing leaf.
    fn inject_shadow_map(&mut self, shadow: &Self::ShadowMap, light: &LightParams) -> Result<()>;

    /// Per leaf: turn lit counts into irradiance brick samples.
    fn average_lit_node_values(&mut self, light: &LightParams) -> Result<()>;

    fn trace_cones(&mut self, frame: &Self::Frame, params: &ConeTraceParams) -> Result<()>;

    fn draw_debug(&mut self, target: &mut Self::DebugTarget, params: &DebugDrawParams) -> Result<()>;

    /// Flush recorded work.
    fn submit(&mut self) -> Result<()>;

    /// Leak-audit registry of the backend's resources, if it keeps one.
    fn registry(&self) -> Option<Arc<ResourceRegistry>> {
        None
    }
}
