//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box of half-extent `padding` around a single point
    pub fn around_point(point: Vec3, padding: f32) -> Self {
        Self {
            min: point - Vec3::splat(padding),
            max: point + Vec3::splat(padding),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Longest edge
    pub fn max_side(&self) -> f32 {
        self.size().max_element()
    }

    /// Cube sharing this box's min corner, with edge = longest side
    pub fn cube(&self) -> Aabb {
        Aabb {
            min: self.min,
            max: self.min + Vec3::splat(self.max_side()),
        }
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Expand AABB to include another box
    pub fn expand(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 4.0));
        assert_eq!(aabb.center(), Vec3::new(0.5, 1.0, 2.0));
        assert_eq!(aabb.size(), Vec3::new(1.0, 2.0, 4.0));
        assert_eq!(aabb.max_side(), 4.0);
    }

    #[test]
    fn test_cube_keeps_min_corner() {
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(3.0, 1.0, 3.0));
        let cube = aabb.cube();
        assert_eq!(cube.min, aabb.min);
        assert_eq!(cube.size(), Vec3::splat(4.0));
        assert!(cube.contains_point(aabb.max));
    }

    #[test]
    fn test_expand_and_merge() {
        let mut a = Aabb::around_point(Vec3::ZERO, 1.0);
        let b = Aabb::around_point(Vec3::splat(3.0), 0.5);
        let merged = a.merged(&b);
        a.expand(&b);
        assert_eq!(a, merged);
        assert_eq!(a.min, Vec3::splat(-1.0));
        assert_eq!(a.max, Vec3::splat(3.5));
    }
}
