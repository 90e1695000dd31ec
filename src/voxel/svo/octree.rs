//! Host snapshot of a built node arena
//!
//! Used to compare builds byte for byte and to inspect the tree shape.

use rkyv::{Archive, Deserialize, Serialize};

use super::node::{Face, NodeIndex, OctreeNode, ROOT};
use super::traverse;
use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

/// Copy of the live prefix of a node arena.
#[derive(Debug, Clone, PartialEq, Archive, Deserialize, Serialize)]
pub struct OctreeSnapshot {
    /// Octree height H
    pub height: u32,
    /// Total allocated nodes (subdivisions * 8 + 1)
    pub node_count: u32,
    /// Nodes `0..node_count`
    pub nodes: Vec<OctreeNode>,
}

impl OctreeSnapshot {
    /// Snapshot the first `node_count` nodes of `arena`.
    pub fn new(height: u32, node_count: u32, arena: &[OctreeNode]) -> Self {
        let live = (node_count as usize).min(arena.len());
        Self {
            height,
            node_count,
            nodes: arena[..live].to_vec(),
        }
    }

    /// Serialize with rkyv
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Voxel(format!("Failed to serialize octree snapshot: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Deserialize from rkyv bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let archived = rkyv::access::<ArchivedOctreeSnapshot, rkyv::rancor::Error>(data)
            .map_err(|e| Error::Voxel(format!("Failed to access octree snapshot: {}", e)))?;
        rkyv::deserialize::<OctreeSnapshot, rkyv::rancor::Error>(archived)
            .map_err(|e| Error::Voxel(format!("Failed to deserialize octree snapshot: {}", e)))
    }

    pub fn node(&self, index: NodeIndex) -> Option<&OctreeNode> {
        self.nodes.get(index.as_usize())
    }

    /// Node indices per level, found by walking child links from the root.
    pub fn levels(&self) -> Vec<Vec<NodeIndex>> {
        let mut levels = vec![vec![ROOT]];
        for _ in 1..self.height {
            let next: Vec<NodeIndex> = levels
                .last()
                .into_iter()
                .flatten()
                .filter_map(|&n| self.node(n).and_then(OctreeNode::children))
                .flat_map(|base| (0..8).map(move |o| base.offset(o)))
                .collect();
            levels.push(next);
        }
        levels
    }

    /// Leaf that owns `voxel`, if the path from the root is allocated.
    pub fn find_leaf(&self, voxel: UVec3) -> Option<NodeIndex> {
        traverse::descend(&self.nodes, voxel, self.height - 1, self.height)
    }

    /// Every `(node, face, neighbor)` link whose reverse link is missing.
    pub fn asymmetric_neighbors(&self) -> Vec<(NodeIndex, Face, NodeIndex)> {
        let mut broken = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for face in Face::ALL {
                let Some(n) = node.neighbor(face) else { continue };
                let back = self.node(n).and_then(|other| other.neighbor(face.opposite()));
                if back != Some(NodeIndex(i as u32)) {
                    broken.push((NodeIndex(i as u32), face, n));
                }
            }
        }
        broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_arena() -> Vec<OctreeNode> {
        let mut nodes = vec![OctreeNode::empty(); 9];
        nodes[0].child = 1;
        nodes[1].neighbors[Face::PosX.slot()] = 2;
        nodes[2].neighbors[Face::NegX.slot()] = 1;
        nodes
    }

    #[test]
    fn test_levels() {
        let snapshot = OctreeSnapshot::new(2, 9, &two_level_arena());
        let levels = snapshot.levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![ROOT]);
        assert_eq!(levels[1].len(), 8);
        assert_eq!(levels[1][0], NodeIndex(1));
    }

    #[test]
    fn test_asymmetric_neighbors() {
        let mut arena = two_level_arena();
        let snapshot = OctreeSnapshot::new(2, 9, &arena);
        assert!(snapshot.asymmetric_neighbors().is_empty());

        arena[3].neighbors[Face::PosY.slot()] = 5;
        let snapshot = OctreeSnapshot::new(2, 9, &arena);
        assert_eq!(snapshot.asymmetric_neighbors(), vec![(NodeIndex(3), Face::PosY, NodeIndex(5))]);
    }

    #[test]
    fn test_rkyv_roundtrip() {
        let snapshot = OctreeSnapshot::new(2, 9, &two_level_arena());
        let bytes = snapshot.to_bytes().unwrap();
        let restored = OctreeSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(restored, snapshot);
    }
}
