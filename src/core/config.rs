//! Voxel cone tracing configuration.
//!
//! Structural values (octree height, buffer resolutions, capacities) size
//! every GPU resource once at init and never change afterwards. The cone
//! tracing tunables in [`ConeTraceSettings`] may be adjusted between frames.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::brick::{BRICK_SIZE, BrickTarget};

/// Lowest supported octree height.
pub const MIN_OCTREE_HEIGHT: u32 = 2;
/// Highest supported octree height. Height 9 builds, but its neighbor
/// connections have never been confirmed correct on hardware.
pub const MAX_OCTREE_HEIGHT: u32 = 9;
/// Node-buffer resolution granularity.
pub const NODE_BUFFER_GRANULARITY: u32 = 16;
/// Largest node-buffer resolution whose squared capacity stays below the
/// `u32::MAX` subdivision flag.
pub const MAX_OCTREE_BUFFER_RES: u32 = 65520;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Immutable configuration for one [`crate::gi::VoxelConeTracer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VctConfig {
    /// Octree height H. The voxel grid resolution is `2^H` per axis and
    /// leaves live at level H-1.
    pub octree_height: u32,
    /// Node storage is `octree_buffer_res^2` nodes. Multiple of 16.
    pub octree_buffer_res: u32,
    /// Edge length of each 3D brick volume, in texels. Multiple of 3.
    pub brick_buffer_res: u32,
    /// Maximum number of voxel fragments kept per voxelization.
    pub fragment_capacity: u32,
    /// Output size of the cone tracing pass (width, height).
    pub cone_tracing_res: [u32; 2],
    /// World-space padding applied around every registered vertex.
    pub bounds_padding: f32,
    /// Per-frame cone tracing parameters.
    pub cone: ConeTraceSettings,
}

impl Default for VctConfig {
    fn default() -> Self {
        Self {
            octree_height: 8,
            octree_buffer_res: 512,
            brick_buffer_res: 192,
            fragment_capacity: 1024 * 1024,
            cone_tracing_res: [400, 225],
            bounds_padding: 1.5,
            cone: ConeTraceSettings::default(),
        }
    }
}

impl VctConfig {
    /// Voxel grid resolution per axis (`2^H`).
    pub fn voxel_resolution(&self) -> u32 {
        1 << self.octree_height
    }

    /// Total number of octree node slots.
    pub fn node_capacity(&self) -> u32 {
        self.octree_buffer_res.saturating_mul(self.octree_buffer_res)
    }

    /// Number of bricks along each axis of a brick volume.
    pub fn bricks_per_axis(&self) -> u32 {
        self.brick_buffer_res / BRICK_SIZE
    }

    /// Number of nodes that can own a brick.
    pub fn brick_capacity(&self) -> u32 {
        let n = self.bricks_per_axis();
        n.saturating_mul(n).saturating_mul(n)
    }

    /// Check the structural values. Called once before any resource exists.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_OCTREE_HEIGHT..=MAX_OCTREE_HEIGHT).contains(&self.octree_height) {
            return Err(Error::Config(format!(
                "octree height {} outside [{}, {}]",
                self.octree_height, MIN_OCTREE_HEIGHT, MAX_OCTREE_HEIGHT
            )));
        }
        if self.octree_buffer_res == 0 || self.octree_buffer_res % NODE_BUFFER_GRANULARITY != 0 {
            return Err(Error::Config(format!(
                "octree buffer resolution {} is not a positive multiple of {}",
                self.octree_buffer_res, NODE_BUFFER_GRANULARITY
            )));
        }
        if self.octree_buffer_res > MAX_OCTREE_BUFFER_RES {
            return Err(Error::Config(format!(
                "octree buffer resolution {} exceeds {}",
                self.octree_buffer_res, MAX_OCTREE_BUFFER_RES
            )));
        }
        if self.brick_buffer_res < BRICK_SIZE || self.brick_buffer_res % BRICK_SIZE != 0 {
            return Err(Error::Config(format!(
                "brick buffer resolution {} is not a positive multiple of {}",
                self.brick_buffer_res, BRICK_SIZE
            )));
        }
        if self.fragment_capacity == 0 {
            return Err(Error::Config("fragment capacity must be non-zero".into()));
        }
        if self.cone_tracing_res[0] == 0 || self.cone_tracing_res[1] == 0 {
            return Err(Error::Config("cone tracing resolution must be non-zero".into()));
        }

        if self.octree_height == MAX_OCTREE_HEIGHT {
            log::warn!(
                "Octree height {} has unverified neighbor connections",
                MAX_OCTREE_HEIGHT
            );
        }
        if self.brick_capacity() < self.node_capacity() {
            log::warn!(
                "Brick volume holds {} bricks but the node buffer holds {} nodes; \
                 nodes past the brick capacity have no filtered storage",
                self.brick_capacity(),
                self.node_capacity()
            );
        }
        Ok(())
    }

    /// Parse a config from JSON. Missing fields fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save the config as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cone tracing
// ---------------------------------------------------------------------------

/// Tunables for the cone tracing pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConeTraceSettings {
    /// Distance falloff applied to ambient occlusion.
    pub lambda_falloff: f32,
    /// Start distance along each cone, in normalized volume units.
    pub local_cone_offset: f32,
    /// World-space push of the cone origin along the surface normal.
    pub world_cone_offset: f32,
    /// Multiplier on gathered irradiance.
    pub indirect_amplification: f32,
    /// Fraction of the cone diameter advanced per step.
    pub step_correction: f32,
    /// Take occlusion from the opacity bricks rather than irradiance alpha.
    pub use_opacity_buffer: bool,
    /// Diagnostic views.
    pub debug: DebugSettings,
}

impl Default for ConeTraceSettings {
    fn default() -> Self {
        Self {
            lambda_falloff: 0.06,
            local_cone_offset: 0.02,
            world_cone_offset: 12.2,
            indirect_amplification: 6.0,
            step_correction: 0.76,
            use_opacity_buffer: true,
            debug: DebugSettings::default(),
        }
    }
}

/// Diagnostic switches. None of these run in the steady-state frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Restrict cone sampling to `[last_level, first_level]`.
    pub enabled: bool,
    /// 0 traces all cones, k in 1..=6 traces only cone k-1.
    pub cone_dir: u32,
    /// Finest level sampled while debugging.
    pub first_level: u32,
    /// Coarsest level sampled while debugging.
    pub last_level: u32,
    /// Level drawn by the brick debug view.
    pub level: u32,
    /// Brick volume drawn by the brick debug view.
    pub buffer: BrickTarget,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cone_dir: 0,
            first_level: 6,
            last_level: 2,
            level: 7,
            buffer: BrickTarget::Opacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = VctConfig::default();
        config.validate().unwrap();
        assert_eq!(config.voxel_resolution(), 256);
        assert_eq!(config.node_capacity(), 512 * 512);
        assert_eq!(config.brick_capacity(), config.node_capacity());
    }

    #[test]
    fn test_height_range() {
        let mut config = VctConfig::default();
        config.octree_height = 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.octree_height = 10;
        assert!(config.validate().is_err());
        config.octree_height = 9;
        assert!(config.validate().is_ok());
        config.octree_height = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_granularity() {
        let mut config = VctConfig::default();
        config.octree_buffer_res = 100;
        assert!(config.validate().is_err());

        let mut config = VctConfig::default();
        config.brick_buffer_res = 100;
        assert!(config.validate().is_err());

        let mut config = VctConfig::default();
        config.brick_buffer_res = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_node_buffer_rejected() {
        let mut config = VctConfig::default();
        config.octree_buffer_res = MAX_OCTREE_BUFFER_RES;
        assert!(config.validate().is_ok());
        assert!(config.node_capacity() < u32::MAX);

        config.octree_buffer_res = 65536;
        assert_eq!(config.node_capacity(), u32::MAX);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = VctConfig::from_json_str(r#"{ "octree_height": 5, "cone": { "lambda_falloff": 0.1 } }"#)
            .unwrap();
        assert_eq!(config.octree_height, 5);
        assert_eq!(config.cone.lambda_falloff, 0.1);
        assert_eq!(config.cone.step_correction, 0.76);
        assert_eq!(config.brick_buffer_res, 192);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            VctConfig::from_json_str(r#"{ "octree_height": 12 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(VctConfig::from_json_str("{ not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vct.json");

        let mut config = VctConfig::default();
        config.octree_height = 6;
        config.cone.debug.buffer = BrickTarget::Irradiance;
        config.save(&path).unwrap();

        let loaded = VctConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = VctConfig::load(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
