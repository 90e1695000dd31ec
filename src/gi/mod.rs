//! Voxel cone tracing global illumination
//!
//! [`VoxelConeTracer`] owns the pass sequence; a [`GiBackend`] executes it,
//! either on the GPU ([`crate::render::WgpuBackend`]) or in host memory
//! ([`SoftwareBackend`]).

pub mod backend;
pub mod params;
pub mod software;
pub mod tracer;

pub use backend::{FrameSource, GiBackend, ShadowMapSource};
pub use params::{ConeTraceParams, DebugDrawMode, DebugDrawParams, LightParams, OctreeParams, VoxelizeParams};
pub use software::{DebugCube, HostFrame, HostShadowMap, SoftwareBackend};
pub use tracer::VoxelConeTracer;

#[cfg(test)]
mod tests;
