//! Voxel data structures shared between the host and the shaders

pub mod brick;
pub mod fragment;
pub mod grid;
pub mod indirect;
pub mod svo;

pub use brick::{Axis, BrickLayout, BrickTarget, BrickVolume, BRICK_SIZE};
pub use fragment::VoxelFragment;
pub use grid::VoxelGrid;
pub use indirect::IndirectArgsRecord;
pub use svo::{NodeIndex, OctreeNode, OctreeSnapshot};
