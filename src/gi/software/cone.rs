//! Host cone tracer, one rayon task per output row

use rayon::prelude::*;

use crate::core::types::{Mat4, UVec3, Vec3, Vec4};
use crate::gi::params::{CONE_COUNT, ConeTraceParams};
use crate::gi::software::raster::{HostFrame, pixel_ndc};
use crate::math::orthonormal_basis;
use crate::voxel::fragment::unpack_rgba8;
use crate::voxel::svo::traverse;
use crate::voxel::{BrickVolume, OctreeNode};

/// tan(30 deg): half-aperture of every cone.
pub const CONE_APERTURE: f32 = 0.577_350_3;
/// Steps before a cone gives up.
pub const MAX_CONE_STEPS: u32 = 128;
/// Accumulated alpha that ends a cone.
pub const OPAQUE_ALPHA: f32 = 0.99;

const NORMAL_CONE_WEIGHT: f32 = 0.25;
const SIDE_CONE_WEIGHT: f32 = 0.15;

/// Directions and weights of the six cones around `n`: one along the
/// normal, five spread evenly at 60 degrees from it.
pub fn cone_directions(n: Vec3) -> [(Vec3, f32); CONE_COUNT as usize] {
    let (t, b) = orthonormal_basis(n);
    let (sin, cos) = 60f32.to_radians().sin_cos();
    std::array::from_fn(|k| {
        if k == 0 {
            return (n, NORMAL_CONE_WEIGHT);
        }
        let phi = (k - 1) as f32 * std::f32::consts::TAU / 5.0;
        let side = t * phi.cos() + b * phi.sin();
        ((n * cos + side * sin).normalize(), SIDE_CONE_WEIGHT)
    })
}

/// Read-only view over the built octree and both brick volumes.
pub(crate) struct ConeVolume<'a> {
    pub nodes: &'a [OctreeNode],
    pub opacity: &'a BrickVolume,
    pub irradiance: &'a BrickVolume,
}

impl ConeVolume<'_> {
    /// Trilinear brick sample at normalized position `p` on `level`.
    /// rgb = irradiance, a = opacity (or irradiance alpha).
    pub fn sample(&self, p: Vec3, level: u32, height: u32, use_opacity: bool) -> Vec4 {
        let res = (1u32 << height) as f32;
        let voxel = (p * res).floor().clamp(Vec3::ZERO, Vec3::splat(res - 1.0)).as_uvec3();
        let Some(node) = traverse::descend(self.nodes, voxel, level, height) else {
            return Vec4::ZERO;
        };

        let scaled = p * (1u32 << level) as f32;
        let s = (scaled - scaled.floor()) * 2.0;
        let i0 = s.floor().min(Vec3::ONE);
        let f = s - i0;
        let base = i0.as_uvec3();

        let mut opacity = 0.0;
        let mut irradiance = Vec4::ZERO;
        for c in 0..8u32 {
            let corner = UVec3::new(c & 1, (c >> 1) & 1, (c >> 2) & 1);
            let w = Vec3::select(corner.cmpeq(UVec3::ONE), f, Vec3::ONE - f);
            let w = w.x * w.y * w.z;
            let q = base + corner;
            opacity += w * unpack_rgba8(self.opacity.load(node.get(), q)).w;
            irradiance += w * unpack_rgba8(self.irradiance.load(node.get(), q));
        }

        let alpha = if use_opacity { opacity } else { irradiance.w };
        Vec4::from((irradiance.truncate(), alpha))
    }

    /// Indirect light and ambient visibility at a surface point.
    pub fn trace(&self, params: &ConeTraceParams, position: Vec3, normal: Vec3) -> Vec4 {
        let res = params.resolution as f32;
        let origin = Vec3::new(params.world_min[0], params.world_min[1], params.world_min[2]);
        let extent = params.world_min[3];
        let start = (position + normal * params.world_offset - origin) / extent;
        let (coarse, fine) = params.level_range();
        let use_opacity = params.use_opacity != 0;

        let mut irradiance = Vec3::ZERO;
        let mut occlusion = 0.0;
        for (k, (dir, weight)) in cone_directions(normal).into_iter().enumerate() {
            let weight = match params.debug_cone {
                0 => weight,
                d if d as usize == k + 1 => 1.0,
                _ => continue,
            };

            let mut t = params.local_offset;
            let mut color = Vec3::ZERO;
            let mut alpha = 0.0f32;
            let mut ao = 0.0f32;
            for _ in 0..MAX_CONE_STEPS {
                let p = start + dir * t;
                if p.cmplt(Vec3::ZERO).any() || p.cmpge(Vec3::ONE).any() {
                    break;
                }
                let diameter = (2.0 * t * CONE_APERTURE).max(1.0 / res);
                let level = ((-diameter.log2()).floor() as i32).clamp(coarse as i32, fine as i32) as u32;
                let s = self.sample(p, level, params.height, use_opacity);

                let visible = (1.0 - alpha) * s.w;
                color += visible * s.truncate();
                ao += visible / (1.0 + params.lambda * t * res);
                alpha += visible;
                if alpha >= OPAQUE_ALPHA {
                    break;
                }
                t += diameter * params.step_correction;
            }

            irradiance += weight * color;
            occlusion += weight * ao;
        }

        Vec4::from((irradiance * params.amplification, 1.0 - occlusion.min(1.0)))
    }
}

/// World position of output pixel `(x, y)` from its linear view depth.
pub(crate) fn reconstruct_position(inv_view: Mat4, inv_proj: Mat4, ndc: glam::Vec2, linear_depth: f32) -> Vec3 {
    let near = inv_proj.project_point3(ndc.extend(0.0));
    let far = inv_proj.project_point3(ndc.extend(1.0));
    // View-space point on the pixel ray at -z = linear_depth
    let t = (linear_depth + near.z) / (near.z - far.z);
    inv_view.transform_point3(near.lerp(far, t))
}

/// Trace every output pixel of `frame` into `output`.
pub(crate) fn trace_frame(volume: &ConeVolume<'_>, params: &ConeTraceParams, frame: &HostFrame, output: &mut [Vec4]) {
    let [out_w, out_h] = params.output_size;
    let inv_view = Mat4::from_cols_array_2d(&params.inv_view);
    let inv_proj = Mat4::from_cols_array_2d(&params.inv_proj);

    output
        .par_chunks_mut(out_w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for (x, out) in row.iter_mut().enumerate() {
                let x = x as u32;
                let sx = (x * frame.width / out_w).min(frame.width - 1);
                let sy = (y * frame.height / out_h).min(frame.height - 1);
                let i = (sy * frame.width + sx) as usize;
                let depth = frame.linear_depth[i];
                if depth <= 0.0 {
                    *out = Vec4::new(0.0, 0.0, 0.0, 1.0);
                    continue;
                }
                let ndc = pixel_ndc(sx, sy, frame.width, frame.height);
                let position = reconstruct_position(inv_view, inv_proj, ndc, depth);
                *out = volume.trace(params, position, frame.normals[i]);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;

    #[test]
    fn test_cone_weights_sum_to_one() {
        let total: f32 = cone_directions(Vec3::Y).iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_side_cones_at_sixty_degrees() {
        for n in [Vec3::Y, Vec3::NEG_Z, Vec3::new(0.6, 0.0, 0.8)] {
            let cones = cone_directions(n);
            assert_eq!(cones[0].0, n);
            for (dir, _) in &cones[1..] {
                assert!((dir.dot(n) - 0.5).abs() < 1e-5);
                assert!((dir.length() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_reconstruct_position() {
        let camera = Camera::look_at(Vec3::new(0.0, 2.0, 10.0), Vec3::new(0.0, 2.0, 0.0), Vec3::Y, 1.5).matrices();
        let world = reconstruct_position(camera.inv_view(), camera.inv_proj(), glam::Vec2::ZERO, 7.0);
        assert!((world - Vec3::new(0.0, 2.0, 3.0)).length() < 1e-3);
    }

    #[test]
    fn test_empty_volume_is_unoccluded() {
        let nodes = vec![OctreeNode::empty(); 9];
        let bricks = BrickVolume::new(6);
        let volume = ConeVolume {
            nodes: &nodes,
            opacity: &bricks,
            irradiance: &bricks,
        };
        assert_eq!(volume.sample(Vec3::splat(0.5), 1, 3, true), Vec4::ZERO);

        let params = ConeTraceParams {
            world_min: [0.0, 0.0, 0.0, 1.0],
            height: 3,
            resolution: 8,
            use_opacity: 1,
            local_offset: 0.02,
            step_correction: 1.0,
            amplification: 1.0,
            ..<ConeTraceParams as bytemuck::Zeroable>::zeroed()
        };
        let out = volume.trace(&params, Vec3::splat(0.5), Vec3::Y);
        assert_eq!(out, Vec4::new(0.0, 0.0, 0.0, 1.0));
    }
}
