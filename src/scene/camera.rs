//! Cameras feeding the G-buffer and shadow inputs

use glam::Quat;

use crate::core::types::{Mat4, Vec3};
use crate::math::Aabb;
use crate::scene::light::DirectionalLight;

/// View and projection of one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub proj: Mat4,
}

impl CameraMatrices {
    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }

    pub fn inv_view(&self) -> Mat4 {
        self.view.inverse()
    }

    pub fn inv_proj(&self) -> Mat4 {
        self.proj.inverse()
    }

    /// Orthographic light camera that sees all of `cube` along the light
    /// direction, depth in [0, 1].
    pub fn for_directional_light(light: &DirectionalLight, cube: &Aabb) -> Self {
        let center = cube.center();
        let radius = cube.size().length() * 0.5;
        let dir = light.direction.normalize_or_zero();
        let up = if dir.dot(Vec3::Y).abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let eye = center - dir * radius * 2.0;
        Self {
            view: Mat4::look_at_rh(eye, center, up),
            proj: Mat4::orthographic_rh(-radius, radius, -radius, radius, radius, radius * 3.0),
        }
    }
}

/// Perspective camera with position and rotation
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, aspect: f32) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));

        Self {
            position,
            rotation,
            fov_y: 60.0_f32.to_radians(),
            aspect,
            near: 0.1,
            far: 500.0,
        }
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn matrices(&self) -> CameraMatrices {
        CameraMatrices {
            view: self.view_matrix(),
            proj: self.projection_matrix(),
        }
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_look_at_forward() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y, 1.0);
        assert!((cam.forward() - Vec3::NEG_Z).length() < 1e-5);
        let p = cam.view_matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-4);
    }

    #[test]
    fn test_light_camera_covers_cube() {
        let cube = Aabb::new(Vec3::splat(-6.0), Vec3::splat(6.0));
        let light = DirectionalLight::new(Vec3::new(0.3, -1.0, 0.2), Vec3::ONE);
        let vp = CameraMatrices::for_directional_light(&light, &cube).view_proj();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { -6.0 } else { 6.0 },
                if i & 2 == 0 { -6.0 } else { 6.0 },
                if i & 4 == 0 { -6.0 } else { 6.0 },
            );
            let clip = vp * Vec4::from((corner, 1.0));
            let ndc = clip.truncate() / clip.w;
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{corner} outside: {ndc}");
            assert!((0.0..=1.0).contains(&ndc.z), "{corner} depth {}", ndc.z);
        }
    }

    #[test]
    fn test_straight_down_light() {
        let cube = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
        let m = CameraMatrices::for_directional_light(&light, &cube);
        assert!(m.view.is_finite());
        // Higher points are closer to a light shining down.
        let vp = m.view_proj();
        let top = vp.project_point3(Vec3::new(1.0, 2.0, 1.0));
        let bottom = vp.project_point3(Vec3::new(1.0, 0.0, 1.0));
        assert!(top.z < bottom.z);
    }
}
