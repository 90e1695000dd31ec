//! Voxgi - sparse voxel octree cone tracing for static-scene global illumination

pub mod core;
pub mod math;
pub mod voxel;
pub mod scene;
pub mod gi;
pub mod render;
