//! Index arithmetic shared by the build passes and the shaders
//!
//! A node at level `L` covers `2^(H-L)` voxels per axis. Going from level
//! `L` to `L+1` picks the octant from bit `H-1-L` of the voxel coordinate
//! (bit 0 = x, bit 1 = y, bit 2 = z). Leaves at level `H-1` cover 2^3
//! voxels and the same rule with `L = H-1` gives the voxel inside the leaf.

use crate::core::types::UVec3;
use crate::voxel::svo::node::{Face, NODE_NULL, NodeIndex, OctreeNode, ROOT};

/// Octant of `voxel` below a node at `level`.
pub fn octant_of(voxel: UVec3, level: u32, height: u32) -> u32 {
    debug_assert!(level < height);
    let shift = height - 1 - level;
    ((voxel.x >> shift) & 1) | (((voxel.y >> shift) & 1) << 1) | (((voxel.z >> shift) & 1) << 2)
}

/// Edge length, in voxels, of a node at `level`.
pub fn node_span(level: u32, height: u32) -> u32 {
    1 << (height - level)
}

/// Min voxel corner of the level-`level` node containing `voxel`.
pub fn node_min_voxel(voxel: UVec3, level: u32, height: u32) -> UVec3 {
    let shift = height - level;
    (voxel >> shift) << shift
}

/// Walk from the root toward `voxel` and return its node at `level`.
///
/// Stops with None at the first node that has no allocated children.
pub fn descend(nodes: &[OctreeNode], voxel: UVec3, level: u32, height: u32) -> Option<NodeIndex> {
    let mut node = ROOT;
    for l in 0..level {
        let children = nodes.get(node.as_usize())?.children()?;
        node = children.offset(octant_of(voxel, l, height));
    }
    Some(node)
}

/// Face neighbor of child `octant` of `parent`, whose children start at
/// `base`. Inside the octet the neighbor is a sibling; across the octet it
/// is the mirrored child of the parent's own neighbor, if that neighbor
/// has been subdivided.
pub fn child_neighbor(nodes: &[OctreeNode], parent: &OctreeNode, base: NodeIndex, octant: u32, face: Face) -> u32 {
    let bit = 1 << face.axis();
    let inside = if face.is_positive() {
        octant & bit == 0
    } else {
        octant & bit != 0
    };
    if inside {
        return base.offset(octant ^ bit).get();
    }
    parent
        .neighbor(face)
        .and_then(|n| nodes.get(n.as_usize()))
        .and_then(OctreeNode::children)
        .map_or(NODE_NULL, |c| c.offset(octant ^ bit).get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::svo::node::NODE_FLAGGED;

    #[test]
    fn test_octant_of() {
        // height 3: root splits on bit 2, level 1 on bit 1, leaves on bit 0
        let v = UVec3::new(5, 2, 7); // 101, 010, 111
        assert_eq!(octant_of(v, 0, 3), 0b101);
        assert_eq!(octant_of(v, 1, 3), 0b110);
        assert_eq!(octant_of(v, 2, 3), 0b101);
    }

    #[test]
    fn test_node_extent() {
        assert_eq!(node_span(0, 3), 8);
        assert_eq!(node_span(2, 3), 2);
        assert_eq!(node_min_voxel(UVec3::new(5, 2, 7), 1, 3), UVec3::new(4, 0, 4));
        assert_eq!(node_min_voxel(UVec3::new(5, 2, 7), 2, 3), UVec3::new(4, 2, 6));
    }

    #[test]
    fn test_descend_stops_at_unallocated() {
        let mut nodes = vec![OctreeNode::empty(); 17];
        nodes[0].child = 1;
        nodes[1 + 0b111].child = 9;
        nodes[2].child = NODE_FLAGGED;

        let v = UVec3::new(7, 7, 7);
        assert_eq!(descend(&nodes, v, 0, 3), Some(ROOT));
        assert_eq!(descend(&nodes, v, 1, 3), Some(NodeIndex(8)));
        assert_eq!(descend(&nodes, v, 2, 3), Some(NodeIndex(16)));
        assert_eq!(descend(&nodes, UVec3::new(4, 0, 0), 2, 3), None);
        assert_eq!(descend(&nodes, UVec3::ZERO, 2, 3), None);
    }

    #[test]
    fn test_child_neighbor_inside_and_across() {
        let mut nodes = vec![OctreeNode::empty(); 17];
        nodes[0].child = 1;
        // Node 1 (octant 0) and node 2 (octant 1, +x of node 1) both split.
        nodes[1].child = 9;
        nodes[1].neighbors[Face::PosX.slot()] = 2;
        nodes[2].child = 17;

        let parent = nodes[1];
        let base = NodeIndex(9);
        assert_eq!(child_neighbor(&nodes, &parent, base, 0, Face::PosX), 10);
        assert_eq!(child_neighbor(&nodes, &parent, base, 1, Face::NegX), 9);
        // Across the octet into node 2's children, mirrored on x.
        assert_eq!(child_neighbor(&nodes, &parent, base, 1, Face::PosX), 17);
        assert_eq!(child_neighbor(&nodes, &parent, base, 7, Face::PosX), 17 + 6);
        // No neighbor on -x.
        assert_eq!(child_neighbor(&nodes, &parent, base, 0, Face::NegX), NODE_NULL);
    }
}
