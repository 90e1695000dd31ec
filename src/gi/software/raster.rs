//! Host rasterization: voxelization, shadow maps and G-buffers
//!
//! All three sample triangles at pixel centers with inclusive edges. The
//! voxelizer uses the same three axis-aligned projections as the GPU pass.

use crate::core::types::{UVec2, UVec3, Vec2, Vec3};
use crate::gi::backend::{FrameSource, ShadowMapSource};
use crate::scene::{CameraMatrices, StaticMesh};
use crate::voxel::VoxelFragment;
use crate::voxel::grid::{VoxelGrid, axis_permutation, dominant_axis};

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Call `emit(x, y, barycentrics)` for every pixel center covered by the
/// triangle. Vertex xy are in pixel units; z is carried for the caller.
pub(crate) fn rasterize_triangle(v: [Vec3; 3], width: u32, height: u32, mut emit: impl FnMut(u32, u32, Vec3)) {
    let [a, b, c] = v.map(|p| p.truncate());
    let area = edge(a, b, c);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min = a.min(b).min(c);
    let max = a.max(b).max(c);
    let x0 = (min.x - 0.5).ceil().max(0.0) as i64;
    let y0 = (min.y - 0.5).ceil().max(0.0) as i64;
    let x1 = ((max.x - 0.5).floor() as i64).min(width as i64 - 1);
    let y1 = ((max.y - 0.5).floor() as i64).min(height as i64 - 1);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w = Vec3::new(edge(b, c, p), edge(c, a, p), edge(a, b, p)) / area;
            if w.cmpge(Vec3::ZERO).all() {
                emit(x as u32, y as u32, w);
            }
        }
    }
}

/// Voxelize meshes in three passes (X, Y, Z). Each triangle is rasterized
/// only in the pass of its dominant normal axis.
pub(crate) fn voxelize_meshes(meshes: &[StaticMesh], grid: &VoxelGrid, mut emit: impl FnMut(VoxelFragment)) {
    let res = grid.resolution();
    for axis in 0..3 {
        let [u, v, w] = axis_permutation(axis);
        for mesh in meshes {
            for t in 0..mesh.triangle_count() {
                let tri = mesh.triangle(t);
                let face = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
                if face.length_squared() <= f32::EPSILON || dominant_axis(face) != axis {
                    continue;
                }
                let normals = mesh.triangle_normals(t);
                let projected = tri.map(|p| {
                    let r = grid.to_voxel_space(p);
                    Vec3::new(r[u], r[v], r[w])
                });
                let depths = Vec3::new(projected[0].z, projected[1].z, projected[2].z);

                rasterize_triangle(projected, res, res, |x, y, bary| {
                    let depth = bary.dot(depths).floor().clamp(0.0, (res - 1) as f32) as u32;
                    let mut voxel = UVec3::ZERO;
                    voxel[u] = x;
                    voxel[v] = y;
                    voxel[w] = depth;
                    let n = normals[0] * bary.x + normals[1] * bary.y + normals[2] * bary.z;
                    emit(VoxelFragment::new(voxel, mesh.albedo, n.normalize_or_zero()));
                });
            }
        }
    }
}

/// Vertex in pixel space: x right, y down, z = NDC depth.
fn to_screen(clip_ndc: Vec3, width: u32, height: u32) -> Vec3 {
    Vec3::new(
        (clip_ndc.x + 1.0) * 0.5 * width as f32,
        (1.0 - clip_ndc.y) * 0.5 * height as f32,
        clip_ndc.z,
    )
}

/// NDC of a pixel center.
pub(crate) fn pixel_ndc(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32 * 2.0 - 1.0,
        1.0 - (y as f32 + 0.5) / height as f32 * 2.0,
    )
}

/// Depth-only light view, depth 1.0 where nothing was drawn.
#[derive(Clone, Debug)]
pub struct HostShadowMap {
    pub camera: CameraMatrices,
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f32>,
}

impl HostShadowMap {
    pub fn render(meshes: &[StaticMesh], camera: CameraMatrices, width: u32, height: u32) -> Self {
        let view_proj = camera.view_proj();
        let mut depth = vec![1.0f32; (width * height) as usize];
        for mesh in meshes {
            for tri in mesh.triangles() {
                let screen = tri.map(|p| to_screen(view_proj.project_point3(p), width, height));
                let z = Vec3::new(screen[0].z, screen[1].z, screen[2].z);
                rasterize_triangle(screen, width, height, |x, y, bary| {
                    let d = bary.dot(z);
                    let texel = &mut depth[(y * width + x) as usize];
                    if (0.0..*texel).contains(&d) {
                        *texel = d;
                    }
                });
            }
        }
        Self { camera, width, height, depth }
    }
}

impl ShadowMapSource for HostShadowMap {
    fn view_proj(&self) -> crate::core::types::Mat4 {
        self.camera.view_proj()
    }

    fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

/// World normals and linear view depth, depth 0 where nothing was drawn.
#[derive(Clone, Debug)]
pub struct HostFrame {
    pub camera: CameraMatrices,
    pub width: u32,
    pub height: u32,
    pub normals: Vec<Vec3>,
    pub linear_depth: Vec<f32>,
}

impl HostFrame {
    pub fn render(meshes: &[StaticMesh], camera: CameraMatrices, width: u32, height: u32) -> Self {
        let view_proj = camera.view_proj();
        let inv_view_proj = view_proj.inverse();
        let pixels = (width * height) as usize;
        let mut zbuffer = vec![f32::INFINITY; pixels];
        let mut normals = vec![Vec3::ZERO; pixels];
        let mut linear_depth = vec![0.0f32; pixels];

        for mesh in meshes {
            for tri in mesh.triangles() {
                let behind = tri
                    .iter()
                    .any(|&p| (view_proj * p.extend(1.0)).w <= 0.0);
                if behind {
                    continue;
                }
                let normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize_or_zero();
                let screen = tri.map(|p| to_screen(view_proj.project_point3(p), width, height));
                let z = Vec3::new(screen[0].z, screen[1].z, screen[2].z);

                rasterize_triangle(screen, width, height, |x, y, bary| {
                    let d = bary.dot(z);
                    let i = (y * width + x) as usize;
                    if !(0.0..=1.0).contains(&d) || d >= zbuffer[i] {
                        return;
                    }
                    zbuffer[i] = d;
                    normals[i] = normal;
                    let ndc = pixel_ndc(x, y, width, height);
                    let world = inv_view_proj.project_point3(ndc.extend(d));
                    linear_depth[i] = -camera.view.transform_point3(world).z;
                });
            }
        }

        Self {
            camera,
            width,
            height,
            normals,
            linear_depth,
        }
    }
}

impl FrameSource for HostFrame {
    fn camera(&self) -> &CameraMatrices {
        &self.camera
    }

    fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use crate::scene::{Camera, DirectionalLight};
    use glam::Vec4;

    #[test]
    fn test_rasterize_covers_half_square() {
        let tri = [Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), Vec3::new(0.0, 4.0, 0.0)];
        let mut covered = Vec::new();
        rasterize_triangle(tri, 8, 8, |x, y, _| covered.push((x, y)));
        // Centers with x + y + 1 <= 4
        assert_eq!(covered.len(), 10);
        assert!(covered.contains(&(0, 0)));
        assert!(covered.contains(&(3, 0)));
        assert!(!covered.contains(&(3, 1)));
    }

    #[test]
    fn test_rasterize_either_winding() {
        let cw = [Vec3::ZERO, Vec3::new(0.0, 4.0, 0.0), Vec3::new(4.0, 0.0, 0.0)];
        let mut count = 0;
        rasterize_triangle(cw, 8, 8, |_, _, bary| {
            assert!((bary.element_sum() - 1.0).abs() < 1e-5);
            count += 1;
        });
        assert_eq!(count, 10);
    }

    #[test]
    fn test_voxelize_axis_aligned_quad() {
        let grid = VoxelGrid::new(Aabb::new(Vec3::ZERO, Vec3::splat(8.0)), 3);
        // Quad in the plane y = 2.5 covering x, z in [1, 5]
        let quad = StaticMesh::quad(
            [
                Vec3::new(1.0, 2.5, 1.0),
                Vec3::new(1.0, 2.5, 5.0),
                Vec3::new(5.0, 2.5, 5.0),
                Vec3::new(5.0, 2.5, 1.0),
            ],
            Vec4::new(1.0, 0.0, 0.0, 1.0),
        );
        let mut fragments = Vec::new();
        voxelize_meshes(&[quad], &grid, |f| fragments.push(f));

        assert!(!fragments.is_empty());
        let mut cells: Vec<UVec3> = fragments.iter().map(|f| f.voxel()).collect();
        cells.sort_by_key(|v| (v.x, v.y, v.z));
        cells.dedup();
        assert_eq!(cells.len(), 16);
        assert!(cells.iter().all(|v| v.y == 2 && (1..5).contains(&v.x) && (1..5).contains(&v.z)));
        assert!(fragments.iter().all(|f| f.normal().y.abs() > 0.99));
        assert_eq!(fragments[0].albedo(), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_shadow_map_depth_order() {
        let cube = Aabb::new(Vec3::splat(-4.0), Vec3::splat(4.0));
        let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
        let camera = CameraMatrices::for_directional_light(&light, &cube);
        let high = StaticMesh::cuboid(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.1, 1.0), Vec4::ONE);
        let low = StaticMesh::cuboid(Vec3::new(0.0, -2.0, 0.0), Vec3::new(3.0, 0.1, 3.0), Vec4::ONE);
        let map = HostShadowMap::render(&[low, high], camera, 32, 32);

        let center = map.depth[(16 * 32 + 16) as usize];
        let edge = map.depth[(16 * 32 + 10) as usize];
        let empty = map.depth[0];
        assert!(center < edge, "high box should be nearer: {center} vs {edge}");
        assert!(edge < 1.0);
        assert_eq!(empty, 1.0);
    }

    #[test]
    fn test_gbuffer_linear_depth() {
        let wall = StaticMesh::quad(
            [
                Vec3::new(-10.0, -10.0, 0.0),
                Vec3::new(10.0, -10.0, 0.0),
                Vec3::new(10.0, 10.0, 0.0),
                Vec3::new(-10.0, 10.0, 0.0),
            ],
            Vec4::ONE,
        );
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 1.0).matrices();
        let frame = HostFrame::render(&[wall], camera, 16, 16);
        let center = (8 * 16 + 8) as usize;
        // The wall is perpendicular to the view axis, so every hit is 5 units deep.
        assert!((frame.linear_depth[center] - 5.0).abs() < 1e-2);
        assert!((frame.normals[center] - Vec3::Z).length() < 1e-5);
    }
}
