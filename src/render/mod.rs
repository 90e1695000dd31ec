//! GPU execution of the voxel cone tracing passes using wgpu

pub mod backend;
pub mod context;
pub mod frame_sync;
pub mod pipeline;
pub mod readback;
pub mod resources;

pub use backend::{GpuDebugTarget, GpuFrame, GpuMesh, GpuShadowMap, WgpuBackend};
pub use context::GpuContext;
pub use frame_sync::{FrameMarker, FramePacer, QueueMarker};
pub use resources::{ResourceFactory, ResourceRegistry};
