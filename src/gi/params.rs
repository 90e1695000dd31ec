//! Typed per-pass parameters
//!
//! Each struct mirrors one WGSL uniform byte for byte. They are built from
//! the immutable config and the frame inputs on the host, and the GPU
//! pipelines declare their size as the binding's minimum size so a layout
//! mismatch fails once at pipeline creation instead of at draw time.

use bytemuck::{Pod, Zeroable};

use crate::core::config::{ConeTraceSettings, VctConfig};
use crate::core::types::{Mat4, UVec2, Vec3, Vec4};
use crate::scene::{CameraMatrices, DirectionalLight};
use crate::voxel::{BrickTarget, VoxelGrid};

/// Stride between dynamic-offset uniform slots.
pub const UNIFORM_SLOT_STRIDE: u64 = 256;

/// Number of cones traced per pixel.
pub const CONE_COUNT: u32 = 6;

/// Grid, capacities and the current level for build and brick passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OctreeParams {
    /// xyz = grid origin, w = voxel size
    pub world_min: [f32; 4],
    pub resolution: u32,
    pub height: u32,
    pub level: u32,
    pub node_capacity: u32,
    pub fragment_capacity: u32,
    pub bricks_per_axis: u32,
    pub brick_res: u32,
    pub _pad: u32,
}

impl OctreeParams {
    pub fn for_level(grid: &VoxelGrid, config: &VctConfig, level: u32) -> Self {
        debug_assert!(level < grid.height());
        Self {
            world_min: grid.packed_origin(),
            resolution: grid.resolution(),
            height: grid.height(),
            level,
            node_capacity: config.node_capacity(),
            fragment_capacity: config.fragment_capacity,
            bricks_per_axis: config.bricks_per_axis(),
            brick_res: config.brick_buffer_res,
            _pad: 0,
        }
    }
}

/// One orthographic voxelization pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct VoxelizeParams {
    pub view_proj: [[f32; 4]; 4],
    /// xyz = grid origin, w = voxel size
    pub world_min: [f32; 4],
    pub resolution: u32,
    /// Dominant axis handled by this pass
    pub axis: u32,
    pub fragment_capacity: u32,
    pub _pad: u32,
}

impl VoxelizeParams {
    pub fn for_axis(grid: &VoxelGrid, fragment_capacity: u32, axis: usize) -> Self {
        Self {
            view_proj: grid.axis_view_proj(axis).to_cols_array_2d(),
            world_min: grid.packed_origin(),
            resolution: grid.resolution(),
            axis: axis as u32,
            fragment_capacity,
            _pad: 0,
        }
    }
}

/// Shadow-map injection and lit-value averaging.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightParams {
    pub inv_view_proj: [[f32; 4]; 4],
    /// xyz = travel direction, w = shadow texels covering one lit leaf
    pub direction: [f32; 4],
    /// rgb = light color
    pub color: [f32; 4],
    pub shadow_size: [u32; 2],
    pub _pad: [u32; 2],
}

impl LightParams {
    /// Derive the per-leaf texel footprint from the light projection.
    pub fn new(light: &DirectionalLight, view_proj: Mat4, shadow_size: UVec2, grid: &VoxelGrid) -> Self {
        let inv = view_proj.inverse();
        let size = shadow_size.max(UVec2::ONE).as_vec2();
        let origin = inv.project_point3(Vec3::new(0.0, 0.0, 0.5));
        let step_x = inv.project_point3(Vec3::new(2.0 / size.x, 0.0, 0.5));
        let step_y = inv.project_point3(Vec3::new(0.0, 2.0 / size.y, 0.5));
        let texel_w = origin.distance(step_x).max(f32::EPSILON);
        let texel_h = origin.distance(step_y).max(f32::EPSILON);
        let leaf = grid.voxel_size() * 2.0;
        let texels_per_leaf = ((leaf / texel_w) * (leaf / texel_h)).max(1.0);

        Self {
            inv_view_proj: inv.to_cols_array_2d(),
            direction: Vec4::from((light.direction, texels_per_leaf)).to_array(),
            color: Vec4::from((light.color, 1.0)).to_array(),
            shadow_size: shadow_size.to_array(),
            _pad: [0; 2],
        }
    }

    pub fn texels_per_leaf(&self) -> f32 {
        self.direction[3]
    }

    pub fn light_direction(&self) -> Vec3 {
        Vec3::new(self.direction[0], self.direction[1], self.direction[2])
    }

    pub fn light_color(&self) -> Vec3 {
        Vec3::new(self.color[0], self.color[1], self.color[2])
    }
}

/// Cone tracing over the G-buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ConeTraceParams {
    pub inv_view: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    /// xyz = grid origin, w = grid extent
    pub world_min: [f32; 4],
    pub output_size: [u32; 2],
    pub input_size: [u32; 2],
    pub height: u32,
    pub resolution: u32,
    pub use_opacity: u32,
    pub debug_cone: u32,
    pub lambda: f32,
    pub local_offset: f32,
    pub world_offset: f32,
    pub amplification: f32,
    pub step_correction: f32,
    pub debug_enabled: u32,
    pub debug_first: u32,
    pub debug_last: u32,
    pub bricks_per_axis: u32,
    pub _pad: [u32; 3],
}

impl ConeTraceParams {
    pub fn new(
        settings: &ConeTraceSettings,
        camera: &CameraMatrices,
        input_size: UVec2,
        output_size: UVec2,
        grid: &VoxelGrid,
        bricks_per_axis: u32,
    ) -> Self {
        let origin = grid.origin();
        Self {
            inv_view: camera.inv_view().to_cols_array_2d(),
            inv_proj: camera.inv_proj().to_cols_array_2d(),
            world_min: [origin.x, origin.y, origin.z, grid.extent()],
            output_size: output_size.to_array(),
            input_size: input_size.to_array(),
            height: grid.height(),
            resolution: grid.resolution(),
            use_opacity: settings.use_opacity_buffer as u32,
            debug_cone: settings.debug.cone_dir.min(CONE_COUNT),
            lambda: settings.lambda_falloff,
            local_offset: settings.local_cone_offset,
            world_offset: settings.world_cone_offset,
            amplification: settings.indirect_amplification,
            step_correction: settings.step_correction,
            debug_enabled: settings.debug.enabled as u32,
            debug_first: settings.debug.first_level,
            debug_last: settings.debug.last_level,
            bricks_per_axis,
            _pad: [0; 3],
        }
    }

    /// Inclusive `(coarsest, finest)` levels sampled by the cones.
    pub fn level_range(&self) -> (u32, u32) {
        let leaf = self.height - 1;
        if self.debug_enabled != 0 {
            let finest = self.debug_first.clamp(1, leaf);
            (self.debug_last.clamp(1, finest), finest)
        } else {
            (1, leaf)
        }
    }
}

/// What the debug draw shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugDrawMode {
    /// One cube per voxel fragment, colored by albedo
    Voxels,
    /// The fragment's node at the debug level, colored by its brick center
    Bricks,
}

/// Instanced debug cube draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DebugDrawParams {
    pub view_proj: [[f32; 4]; 4],
    /// xyz = grid origin, w = voxel size
    pub world_min: [f32; 4],
    pub level: u32,
    /// 0 = voxels, 1 = bricks
    pub mode: u32,
    /// 0 = opacity, 1 = irradiance
    pub buffer: u32,
    pub height: u32,
    pub bricks_per_axis: u32,
    pub resolution: u32,
    pub _pad: [u32; 2],
}

impl DebugDrawParams {
    pub fn new(
        mode: DebugDrawMode,
        buffer: BrickTarget,
        level: u32,
        camera: &CameraMatrices,
        grid: &VoxelGrid,
        bricks_per_axis: u32,
    ) -> Self {
        Self {
            view_proj: camera.view_proj().to_cols_array_2d(),
            world_min: grid.packed_origin(),
            level: level.min(grid.height() - 1),
            mode: match mode {
                DebugDrawMode::Voxels => 0,
                DebugDrawMode::Bricks => 1,
            },
            buffer: match buffer {
                BrickTarget::Opacity => 0,
                BrickTarget::Irradiance => 1,
            },
            height: grid.height(),
            bricks_per_axis,
            resolution: grid.resolution(),
            _pad: [0; 2],
        }
    }

    pub fn draw_mode(&self) -> DebugDrawMode {
        if self.mode == 0 {
            DebugDrawMode::Voxels
        } else {
            DebugDrawMode::Bricks
        }
    }

    pub fn target(&self) -> BrickTarget {
        if self.buffer == 0 {
            BrickTarget::Opacity
        } else {
            BrickTarget::Irradiance
        }
    }
}
