//! Padded bounding box of all static geometry

use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::scene::mesh::StaticMesh;

/// Grows a padded AABB as static geometry is registered.
///
/// Every vertex contributes a cube of half-extent `padding` around itself,
/// so surfaces never sit exactly on the voxel grid boundary. Once frozen
/// (voxelization has started) the box is read-only.
#[derive(Clone, Debug)]
pub struct SceneBoundsTracker {
    bounds: Option<Aabb>,
    padding: f32,
    frozen: bool,
}

impl SceneBoundsTracker {
    pub fn new(padding: f32) -> Self {
        Self {
            bounds: None,
            padding,
            frozen: false,
        }
    }

    /// Register one vertex.
    pub fn add_vertex(&mut self, position: Vec3) {
        if self.frozen {
            log::warn!("Ignoring vertex {} registered after voxelization began", position);
            return;
        }
        let padded = Aabb::around_point(position, self.padding);
        match &mut self.bounds {
            Some(bounds) => bounds.expand(&padded),
            None => self.bounds = Some(padded),
        }
    }

    pub fn add_vertices(&mut self, positions: impl IntoIterator<Item = Vec3>) {
        for p in positions {
            self.add_vertex(p);
        }
    }

    pub fn add_mesh(&mut self, mesh: &StaticMesh) {
        self.add_vertices(mesh.positions.iter().copied());
    }

    /// Padded box, None until a vertex has been registered.
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Cube `(min, min + longest side)` that defines the voxel grid.
    pub fn cube(&self) -> Option<Aabb> {
        self.bounds.map(|b| b.cube())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let tracker = SceneBoundsTracker::new(1.5);
        assert!(tracker.bounds().is_none());
        assert!(tracker.cube().is_none());
    }

    #[test]
    fn test_padding_and_growth() {
        let mut tracker = SceneBoundsTracker::new(1.5);
        tracker.add_vertex(Vec3::ZERO);
        assert_eq!(tracker.bounds(), Some(Aabb::new(Vec3::splat(-1.5), Vec3::splat(1.5))));

        tracker.add_vertex(Vec3::new(10.0, 1.0, -2.0));
        let b = tracker.bounds().unwrap();
        assert_eq!(b.min, Vec3::new(-1.5, -1.5, -3.5));
        assert_eq!(b.max, Vec3::new(11.5, 2.5, 1.5));

        let cube = tracker.cube().unwrap();
        assert_eq!(cube.min, b.min);
        assert_eq!(cube.size(), Vec3::splat(13.0));
    }

    #[test]
    fn test_frozen_is_read_only() {
        let mut tracker = SceneBoundsTracker::new(0.0);
        tracker.add_vertex(Vec3::ONE);
        tracker.freeze();
        tracker.add_vertex(Vec3::splat(100.0));
        assert!(tracker.is_frozen());
        assert_eq!(tracker.bounds().unwrap().max, Vec3::ONE);
    }
}
