//! World-to-voxel mapping for the static scene cube

use crate::core::types::{Mat4, UVec3, Vec3, Vec4};
use crate::math::Aabb;

/// Cubic voxel grid of `2^height` cells per axis over a world-space cube.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelGrid {
    origin: Vec3,
    extent: f32,
    height: u32,
}

impl VoxelGrid {
    /// Grid over `cube`. Non-cubic boxes are widened to their longest side.
    pub fn new(cube: Aabb, height: u32) -> Self {
        Self {
            origin: cube.min,
            extent: cube.max_side().max(f32::EPSILON),
            height,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Edge length of the whole grid in world units.
    pub fn extent(&self) -> f32 {
        self.extent
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> u32 {
        1 << self.height
    }

    pub fn voxel_size(&self) -> f32 {
        self.extent / self.resolution() as f32
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.origin, self.origin + Vec3::splat(self.extent))
    }

    /// Position in voxel units (0..resolution inside the grid).
    pub fn to_voxel_space(&self, world: Vec3) -> Vec3 {
        (world - self.origin) / self.voxel_size()
    }

    /// Position in normalized units (0..1 inside the grid).
    pub fn to_normalized(&self, world: Vec3) -> Vec3 {
        (world - self.origin) / self.extent
    }

    /// Cell containing `world`, or None outside the grid.
    pub fn voxel_of(&self, world: Vec3) -> Option<UVec3> {
        let v = self.to_voxel_space(world);
        let res = self.resolution() as f32;
        if v.cmplt(Vec3::ZERO).any() || v.cmpge(Vec3::splat(res)).any() {
            return None;
        }
        Some(v.floor().as_uvec3())
    }

    /// Cell containing `world`, clamped onto the grid.
    pub fn clamped_voxel_of(&self, world: Vec3) -> UVec3 {
        let max = (self.resolution() - 1) as f32;
        self.to_voxel_space(world)
            .floor()
            .clamp(Vec3::ZERO, Vec3::splat(max))
            .as_uvec3()
    }

    /// World-space min corner of a cell.
    pub fn voxel_min(&self, voxel: UVec3) -> Vec3 {
        self.origin + voxel.as_vec3() * self.voxel_size()
    }

    /// `world_min.xyz` + voxel size in `w`, the layout every shader uniform uses.
    pub fn packed_origin(&self) -> [f32; 4] {
        [self.origin.x, self.origin.y, self.origin.z, self.voxel_size()]
    }

    /// Orthographic projection used by the voxelization pass along `axis`.
    ///
    /// Maps the grid onto NDC with `axis` as depth: the two remaining axes
    /// (in cyclic order after `axis`) become NDC x and y in [-1, 1] and
    /// `axis` becomes z in [0, 1].
    pub fn axis_view_proj(&self, axis: usize) -> Mat4 {
        let [u, v, w] = axis_permutation(axis);
        let scale = 2.0 / self.extent;
        let mut rows = [[0.0f32; 4]; 4];
        rows[0][u] = scale;
        rows[0][3] = -self.origin[u] * scale - 1.0;
        rows[1][v] = scale;
        rows[1][3] = -self.origin[v] * scale - 1.0;
        rows[2][w] = 1.0 / self.extent;
        rows[2][3] = -self.origin[w] / self.extent;
        rows[3][3] = 1.0;
        Mat4::from_cols_array_2d(&rows).transpose()
    }

    /// Apply the axis projection to a point, for CPU-side checks.
    pub fn project_on_axis(&self, axis: usize, world: Vec3) -> Vec3 {
        let clip = self.axis_view_proj(axis) * Vec4::from((world, 1.0));
        clip.truncate()
    }
}

/// `[u, v, depth]` component indices for the voxelization pass along `axis`.
pub fn axis_permutation(axis: usize) -> [usize; 3] {
    debug_assert!(axis < 3);
    [(axis + 1) % 3, (axis + 2) % 3, axis]
}

/// Index of the largest component, ties resolved toward x then y.
pub fn dominant_axis(v: Vec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}
