//! Orthonormal tangent frames

use crate::core::types::Vec3;

/// Tangent and bitangent completing a right-handed frame around unit `n`.
///
/// Branchless construction that stays stable when `n` points straight
/// along +Z or -Z, where the cross-product-with-up method degenerates.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = if n.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let tangent = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (tangent, bitangent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthonormal(n: Vec3) {
        let (t, b) = orthonormal_basis(n);
        assert!((t.length() - 1.0).abs() < 1e-5, "tangent not unit for {n}");
        assert!((b.length() - 1.0).abs() < 1e-5, "bitangent not unit for {n}");
        assert!(t.dot(n).abs() < 1e-5);
        assert!(b.dot(n).abs() < 1e-5);
        assert!(t.dot(b).abs() < 1e-5);
        assert!(t.cross(b).dot(n) > 0.99);
    }

    #[test]
    fn test_axes_and_poles() {
        for n in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
            assert_orthonormal(n);
        }
    }

    #[test]
    fn test_near_poles() {
        assert_orthonormal(Vec3::new(1e-4, 0.0, -1.0).normalize());
        assert_orthonormal(Vec3::new(0.0, -1e-4, 1.0).normalize());
    }

    #[test]
    fn test_arbitrary_directions() {
        for i in 0..32 {
            let a = i as f32 * 0.7;
            let n = Vec3::new(a.cos(), (a * 1.3).sin(), (a * 0.4).cos() - 0.5).normalize();
            assert_orthonormal(n);
        }
    }
}
