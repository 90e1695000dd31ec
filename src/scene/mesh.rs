//! Static triangle meshes submitted for voxelization

use bytemuck::{Pod, Zeroable};

use crate::core::types::{Vec3, Vec4};
use crate::voxel::grid::dominant_axis;

/// Interleaved vertex uploaded for the voxelization pass - 40 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// Indexed triangle list with a single albedo.
#[derive(Clone, Debug, Default)]
pub struct StaticMesh {
    pub positions: Vec<Vec3>,
    /// Per-vertex normals. Empty means flat face normals.
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub albedo: Vec4,
}

impl StaticMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex positions of triangle `t`.
    pub fn triangle(&self, t: usize) -> [Vec3; 3] {
        let i = &self.indices[t * 3..t * 3 + 3];
        [
            self.positions[i[0] as usize],
            self.positions[i[1] as usize],
            self.positions[i[2] as usize],
        ]
    }

    /// Vertex normals of triangle `t`, or its face normal three times.
    pub fn triangle_normals(&self, t: usize) -> [Vec3; 3] {
        if self.normals.len() != self.positions.len() {
            let [a, b, c] = self.triangle(t);
            let n = (b - a).cross(c - a).normalize_or_zero();
            return [n; 3];
        }
        let i = &self.indices[t * 3..t * 3 + 3];
        [
            self.normals[i[0] as usize],
            self.normals[i[1] as usize],
            self.normals[i[2] as usize],
        ]
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (0..self.triangle_count()).map(|t| self.triangle(t))
    }

    /// De-indexed vertices for GPU upload, one list per dominant axis of
    /// the triangle's face normal. Degenerate triangles are dropped.
    pub fn axis_binned_vertices(&self) -> [Vec<MeshVertex>; 3] {
        let mut bins: [Vec<MeshVertex>; 3] = Default::default();
        for t in 0..self.triangle_count() {
            let tri = self.triangle(t);
            let face = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
            if face.length_squared() <= f32::EPSILON {
                continue;
            }
            let normals = self.triangle_normals(t);
            let bin = &mut bins[dominant_axis(face)];
            for (p, n) in tri.iter().zip(normals) {
                bin.push(MeshVertex {
                    position: p.to_array(),
                    normal: n.to_array(),
                    color: self.albedo.to_array(),
                });
            }
        }
        bins
    }

    /// Closed axis-aligned box, 12 outward-facing triangles.
    pub fn cuboid(center: Vec3, half_extent: Vec3, albedo: Vec4) -> Self {
        let mut mesh = StaticMesh {
            albedo,
            ..Default::default()
        };
        for axis in 0..3 {
            for sign in [1.0f32, -1.0] {
                let mut n = Vec3::ZERO;
                n[axis] = sign;
                let mut u = Vec3::ZERO;
                u[(axis + 1) % 3] = 1.0;
                let mut v = Vec3::ZERO;
                v[(axis + 2) % 3] = 1.0;
                if sign < 0.0 {
                    std::mem::swap(&mut u, &mut v);
                }
                let face_center = center + n * half_extent;
                let (u, v) = (u * half_extent, v * half_extent);
                mesh.push_quad(
                    [
                        face_center - u - v,
                        face_center + u - v,
                        face_center + u + v,
                        face_center - u + v,
                    ],
                    n,
                );
            }
        }
        mesh
    }

    pub fn cube(center: Vec3, half_size: f32, albedo: Vec4) -> Self {
        Self::cuboid(center, Vec3::splat(half_size), albedo)
    }

    /// Single quad (2 triangles) with the given corners in CCW order.
    pub fn quad(corners: [Vec3; 4], albedo: Vec4) -> Self {
        let n = (corners[1] - corners[0]).cross(corners[2] - corners[0]).normalize_or_zero();
        let mut mesh = StaticMesh {
            albedo,
            ..Default::default()
        };
        mesh.push_quad(corners, n);
        mesh
    }

    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&corners);
        self.normals.extend_from_slice(&[normal; 4]);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 40);
    }

    #[test]
    fn test_cube_is_closed_and_outward() {
        let center = Vec3::new(1.0, 2.0, 3.0);
        let cube = StaticMesh::cube(center, 5.0, Vec4::ONE);
        assert_eq!(cube.triangle_count(), 12);
        for t in 0..cube.triangle_count() {
            let [a, b, c] = cube.triangle(t);
            let n = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(n.dot(centroid - center) > 0.0, "triangle {t} faces inward");
            assert!((cube.triangle_normals(t)[0] - n.normalize()).length() < 1e-6);
        }
    }

    #[test]
    fn test_quad_face_normal() {
        let quad = StaticMesh::quad(
            [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 0.0, -1.0), Vec3::NEG_Z],
            Vec4::ONE,
        );
        assert_eq!(quad.triangle_count(), 2);
        assert!((quad.triangle_normals(0)[0] - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_axis_binned_vertices() {
        let cube = StaticMesh::cube(Vec3::ZERO, 1.0, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let bins = cube.axis_binned_vertices();
        // Two faces per axis, two triangles per face
        for (axis, bin) in bins.iter().enumerate() {
            assert_eq!(bin.len(), 12);
            for v in bin {
                assert_eq!(v.normal[axis].abs(), 1.0);
                assert_eq!(v.color, [0.5, 0.5, 0.5, 1.0]);
            }
        }

        let degenerate = StaticMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        assert!(degenerate.axis_binned_vertices().iter().all(Vec::is_empty));
    }
}
