//! Sparse voxel octree stored as a flat node arena

pub mod node;
pub mod octree;
pub mod traverse;

pub use node::{Face, NODE_FLAGGED, NODE_NULL, NodeIndex, OctreeNode, ROOT};
pub use octree::OctreeSnapshot;
