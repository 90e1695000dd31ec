//! Voxel cone tracing orchestrator
//!
//! Sequences the voxelize, build, brick, injection and tracing passes on a
//! [`GiBackend`]. Per-level loop bounds live in GPU-written indirect
//! records; the only host synchronization is the node counter readback at
//! the end of a build.

use crate::core::config::{ConeTraceSettings, VctConfig};
use crate::core::error::Error;
use crate::core::types::{Result, UVec2};
use crate::gi::backend::{FrameSource, GiBackend, ShadowMapSource};
use crate::gi::params::{ConeTraceParams, DebugDrawMode, DebugDrawParams, LightParams};
use crate::scene::{CameraMatrices, DirectionalLight, LightProcessingState, SceneBoundsTracker};
use crate::voxel::indirect;
use crate::voxel::{Axis, BrickTarget, VoxelGrid};

/// Static-scene global illumination via a sparse voxel octree.
///
/// Construction never fails: if the config is invalid or the backend cannot
/// be created the tracer is not ready and every entry point is a no-op.
pub struct VoxelConeTracer<B: GiBackend> {
    config: VctConfig,
    backend: Option<B>,
    grid: Option<VoxelGrid>,
    needs_voxelization: bool,
    node_count: u32,
    light_state: LightProcessingState,
}

impl<B: GiBackend> VoxelConeTracer<B> {
    /// Validate `config` and create the backend with it.
    pub fn new(config: VctConfig, init: impl FnOnce(&VctConfig) -> Result<B>) -> Self {
        let backend = match config.validate().and_then(|()| init(&config)) {
            Ok(backend) => {
                log::info!(
                    "Voxel cone tracing ready: height {}, {} node slots, {}^3 brick volume",
                    config.octree_height,
                    config.node_capacity(),
                    config.brick_buffer_res
                );
                Some(backend)
            }
            Err(e) => {
                log::error!("Voxel cone tracing disabled: {}", e);
                None
            }
        };

        Self {
            config,
            backend,
            grid: None,
            needs_voxelization: true,
            node_count: 0,
            light_state: LightProcessingState::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn config(&self) -> &VctConfig {
        &self.config
    }

    pub fn cone_settings(&self) -> &ConeTraceSettings {
        &self.config.cone
    }

    /// Cone tunables may change between frames; structural values may not.
    pub fn cone_settings_mut(&mut self) -> &mut ConeTraceSettings {
        &mut self.config.cone
    }

    pub fn needs_voxelization(&self) -> bool {
        self.needs_voxelization
    }

    /// True if `light` differs from the last injected light in any field.
    pub fn needs_process_light(&self, light: &DirectionalLight) -> bool {
        self.light_state.needs_update(light)
    }

    /// Allocated nodes after the last build (`subdivisions * 8 + 1`).
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn grid(&self) -> Option<&VoxelGrid> {
        self.grid.as_ref()
    }

    pub fn brick_buffer_res(&self) -> u32 {
        self.config.brick_buffer_res
    }

    pub fn output_size(&self) -> UVec2 {
        UVec2::from(self.config.cone_tracing_res)
    }

    /// Byte offset of a level's record in the indirect buffer.
    pub fn indirect_args_offset(&self, level: u32) -> u64 {
        indirect::indirect_args_offset(level)
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    /// Voxelize the static scene, build the octree and its opacity bricks.
    ///
    /// Runs once; later calls are no-ops. A failed build leaves the octree
    /// cleared and the latch armed so the next call retries.
    pub fn voxelize_static_scene(
        &mut self,
        geometry: &[B::Geometry],
        bounds: &mut SceneBoundsTracker,
    ) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        if !self.needs_voxelization {
            return Ok(());
        }

        let cube = bounds
            .cube()
            .ok_or_else(|| Error::Voxel("scene bounds are empty".into()))?;
        bounds.freeze();
        let grid = VoxelGrid::new(cube, self.config.octree_height);

        match Self::build(backend, &self.config, geometry, &grid) {
            Ok(node_count) => {
                log::info!(
                    "Octree built: {} nodes over a {}^3 grid ({:.3} units per voxel)",
                    node_count,
                    grid.resolution(),
                    grid.voxel_size()
                );
                self.grid = Some(grid);
                self.node_count = node_count;
                self.needs_voxelization = false;
                self.light_state.reset();
                Ok(())
            }
            Err(e) => {
                log::error!("Voxelization failed: {}", e);
                if let Err(clear_err) = backend.clear_octree().and_then(|()| backend.submit()) {
                    log::error!("Failed to clear octree after failed build: {}", clear_err);
                }
                self.node_count = 0;
                Err(e)
            }
        }
    }

    fn build(backend: &mut B, config: &VctConfig, geometry: &[B::Geometry], grid: &VoxelGrid) -> Result<u32> {
        let height = config.octree_height;

        backend.clear_octree()?;
        backend.voxelize(geometry, grid)?;

        for level in 0..height - 1 {
            backend.flag_nodes(level)?;
            backend.subdivide_nodes(level)?;
            backend.connect_neighbors(level)?;
            log::debug!("Octree level {} subdivided", level);
        }
        backend.connect_nodes_to_voxels()?;

        let packs = backend.read_node_pack_counter()?;
        let node_count = packs
            .checked_mul(8)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| Error::Voxel(format!("node counter overflow: {} subdivisions", packs)))?;
        if node_count > config.node_capacity() {
            log::warn!(
                "Octree needed {} nodes but only {} fit; deepest subdivisions were dropped",
                node_count,
                config.node_capacity()
            );
        }

        backend.clear_brick_buffer(BrickTarget::Opacity)?;
        backend.construct_opacity()?;
        Self::filter_bricks(backend, BrickTarget::Opacity, height)?;
        backend.submit()?;
        Ok(node_count)
    }

    /// Leaf averaging, then gather + averaging from level H-2 up to 1.
    fn filter_bricks(backend: &mut B, target: BrickTarget, height: u32) -> Result<()> {
        let leaf = height - 1;
        Self::average_axes(backend, target, leaf)?;
        for level in (1..leaf).rev() {
            backend.gather_from_low_level(target, level)?;
            Self::average_axes(backend, target, level)?;
        }
        log::debug!("Filtered {} bricks", target.label());
        Ok(())
    }

    fn average_axes(backend: &mut B, target: BrickTarget, level: u32) -> Result<()> {
        for axis in Axis::ALL {
            backend.average_along_axis(target, axis, level)?;
        }
        Ok(())
    }

    /// Zero the irradiance bricks and the per-leaf lit counters.
    pub fn clear_irradiance_brick_buffer(&mut self) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        backend.clear_brick_buffer(BrickTarget::Irradiance)?;
        backend.reset_node_light()?;
        backend.submit()
    }

    /// Inject the shadow map and rebuild irradiance bricks for `light`.
    ///
    /// Skipped before the octree exists and when `light` equals the last
    /// injected light.
    pub fn process_shadow_map(&mut self, light: &DirectionalLight, shadow: &B::ShadowMap) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let Some(grid) = self.grid.filter(|_| !self.needs_voxelization) else {
            return Ok(());
        };
        if !self.light_state.needs_update(light) {
            return Ok(());
        }

        let params = LightParams::new(light, shadow.view_proj(), shadow.size(), &grid);
        backend.inject_shadow_map(shadow, &params)?;
        backend.average_lit_node_values(&params)?;
        Self::filter_bricks(backend, BrickTarget::Irradiance, self.config.octree_height)?;
        backend.submit()?;

        self.light_state.record(*light);
        log::debug!(
            "Injected light {:?} ({:.1} shadow texels per leaf)",
            light.direction,
            params.texels_per_leaf()
        );
        Ok(())
    }

    /// Clear and re-inject irradiance if the light changed. Returns whether
    /// anything ran.
    pub fn update_lighting(&mut self, light: &DirectionalLight, shadow: &B::ShadowMap) -> Result<bool> {
        if !self.is_ready() || self.needs_voxelization || !self.needs_process_light(light) {
            return Ok(false);
        }
        self.clear_irradiance_brick_buffer()?;
        self.process_shadow_map(light, shadow)?;
        Ok(true)
    }

    /// Trace cones for every output pixel of the current G-buffer.
    pub fn voxel_cone_tracing(&mut self, frame: &B::Frame) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let Some(grid) = self.grid.filter(|_| !self.needs_voxelization) else {
            return Ok(());
        };

        let params = ConeTraceParams::new(
            &self.config.cone,
            frame.camera(),
            frame.size(),
            UVec2::from(self.config.cone_tracing_res),
            &grid,
            self.config.bricks_per_axis(),
        );
        backend.trace_cones(frame, &params)?;
        backend.submit()
    }

    /// Debug view of the voxels or one brick volume. Not for steady-state
    /// frames.
    pub fn draw_buffers(
        &mut self,
        mode: DebugDrawMode,
        camera: &CameraMatrices,
        target: &mut B::DebugTarget,
    ) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let Some(grid) = self.grid.filter(|_| !self.needs_voxelization) else {
            return Ok(());
        };

        let debug = &self.config.cone.debug;
        let params = DebugDrawParams::new(
            mode,
            debug.buffer,
            debug.level,
            camera,
            &grid,
            self.config.bricks_per_axis(),
        );
        backend.draw_debug(target, &params)?;
        backend.submit()
    }

    /// Release the backend and report resources still alive afterwards.
    pub fn clear(&mut self) -> Vec<String> {
        let Some(backend) = self.backend.take() else {
            return Vec::new();
        };
        let registry = backend.registry();
        drop(backend);

        self.grid = None;
        self.node_count = 0;
        self.needs_voxelization = true;
        self.light_state.reset();

        let leaks = registry.map(|r| r.live_labels()).unwrap_or_default();
        for label in &leaks {
            log::warn!("GPU resource still alive after teardown: {}", label);
        }
        leaks
    }
}

impl<B: GiBackend> Drop for VoxelConeTracer<B> {
    fn drop(&mut self) {
        self.clear();
    }
}
