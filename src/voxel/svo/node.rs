//! Sparse voxel octree node and typed arena index

use bytemuck::{Pod, Zeroable};
use rkyv::{Archive, Deserialize, Serialize};

/// `child` value of a node with no children.
pub const NODE_NULL: u32 = 0;
/// `child` value of a node marked for subdivision but not yet allocated.
pub const NODE_FLAGGED: u32 = u32::MAX;
/// Index of the permanently allocated root.
pub const ROOT: NodeIndex = NodeIndex(0);

/// Face directions in neighbor-slot order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Face {
    pub const ALL: [Face; 6] = [Face::PosX, Face::NegX, Face::PosY, Face::NegY, Face::PosZ, Face::NegZ];

    /// Slot in [`OctreeNode::neighbors`].
    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn axis(self) -> usize {
        self.slot() / 2
    }

    pub fn is_positive(self) -> bool {
        self.slot() % 2 == 0
    }

    pub fn opposite(self) -> Face {
        Face::ALL[self.slot() ^ 1]
    }
}

/// Index into the node arena. Never a pointer, so the arena stays
/// relocatable and trivially serializable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Child `octant` of an octet starting at `self`.
    pub fn offset(self, octant: u32) -> NodeIndex {
        debug_assert!(octant < 8);
        NodeIndex(self.0 + octant)
    }
}

/// Octree node - exactly 32 bytes, 32-byte aligned
///
/// Layout (matches the 8-word stride used by every shader):
/// - child (4 bytes): base of 8 contiguous children, NODE_NULL or NODE_FLAGGED
/// - neighbors (24 bytes): +X, -X, +Y, -Y, +Z, -Z face neighbors, 0 = none
/// - data (4 bytes): leaf fragment index + 1, 0 = no attached fragment
///
/// The root is never anyone's child or neighbor, so 0 doubles as "none" and
/// an all-zero arena is an empty octree.
#[repr(C, align(32))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Archive, Deserialize, Serialize)]
pub struct OctreeNode {
    pub child: u32,
    pub neighbors: [u32; 6],
    pub data: u32,
}

impl OctreeNode {
    /// Create an empty node
    pub const fn empty() -> Self {
        Self {
            child: NODE_NULL,
            neighbors: [NODE_NULL; 6],
            data: 0,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.child == NODE_FLAGGED
    }

    /// True once children have been allocated.
    pub fn is_subdivided(&self) -> bool {
        self.child != NODE_NULL && self.child != NODE_FLAGGED
    }

    pub fn children(&self) -> Option<NodeIndex> {
        self.is_subdivided().then_some(NodeIndex(self.child))
    }

    pub fn neighbor(&self, face: Face) -> Option<NodeIndex> {
        let n = self.neighbors[face.slot()];
        (n != NODE_NULL).then_some(NodeIndex(n))
    }

    /// Fragment attached to a leaf.
    pub fn fragment(&self) -> Option<u32> {
        self.data.checked_sub(1)
    }

    /// Whether a node at `level` carries brick content in an octree of
    /// `height`: leaves need an attached fragment, inner nodes children.
    pub fn has_content(&self, level: u32, height: u32) -> bool {
        if level + 1 == height {
            self.data != 0
        } else {
            self.is_subdivided()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_and_alignment() {
        assert_eq!(std::mem::size_of::<OctreeNode>(), 32);
        assert_eq!(std::mem::align_of::<OctreeNode>(), 32);
    }

    #[test]
    fn test_zeroed_is_empty() {
        let node: OctreeNode = bytemuck::Zeroable::zeroed();
        assert_eq!(node, OctreeNode::empty());
        assert!(!node.is_subdivided());
        assert!(!node.is_flagged());
        assert_eq!(node.fragment(), None);
        assert!(Face::ALL.iter().all(|&f| node.neighbor(f).is_none()));
    }

    #[test]
    fn test_child_states() {
        let mut node = OctreeNode::empty();
        node.child = NODE_FLAGGED;
        assert!(node.is_flagged());
        assert_eq!(node.children(), None);
        node.child = 9;
        assert_eq!(node.children(), Some(NodeIndex(9)));
        assert_eq!(node.children().map(|c| c.offset(7)), Some(NodeIndex(16)));
    }

    #[test]
    fn test_has_content() {
        let mut leaf = OctreeNode::empty();
        assert!(!leaf.has_content(2, 3));
        leaf.data = 5;
        assert!(leaf.has_content(2, 3));
        assert_eq!(leaf.fragment(), Some(4));

        let mut inner = OctreeNode::empty();
        inner.child = NODE_FLAGGED;
        assert!(!inner.has_content(1, 3));
        inner.child = 1;
        assert!(inner.has_content(1, 3));
    }

    #[test]
    fn test_faces() {
        assert_eq!(Face::PosY.axis(), 1);
        assert!(Face::PosZ.is_positive());
        assert!(!Face::NegX.is_positive());
        assert_eq!(Face::NegZ.opposite(), Face::PosZ);
        assert_eq!(Face::PosX.opposite(), Face::NegX);
    }
}
