//! Directional light and the injection cache

use crate::core::types::Vec3;

/// The single directional light whose shadow map seeds irradiance.
///
/// Compared by exact value: any bit of change re-triggers injection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (from the light toward the scene).
    pub direction: Vec3,
    /// Linear RGB radiance.
    pub color: Vec3,
    /// Placement of the shadow camera.
    pub position: Vec3,
    /// Radius covered by the shadow camera.
    pub radius: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            position: Vec3::ZERO,
            radius: 0.0,
        }
    }

    pub fn with_placement(mut self, position: Vec3, radius: f32) -> Self {
        self.position = position;
        self.radius = radius;
        self
    }
}

/// Last light whose irradiance was injected.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LightProcessingState {
    processed: Option<DirectionalLight>,
}

impl LightProcessingState {
    /// True unless `light` equals the cached light field for field.
    pub fn needs_update(&self, light: &DirectionalLight) -> bool {
        self.processed.as_ref() != Some(light)
    }

    pub fn record(&mut self, light: DirectionalLight) {
        self.processed = Some(light);
    }

    pub fn reset(&mut self) {
        self.processed = None;
    }

    pub fn processed(&self) -> Option<&DirectionalLight> {
        self.processed.as_ref()
    }
}
