//! Indirect argument records driving GPU-sized passes
//!
//! One buffer holds `height + 1` records. Slot 0 describes the voxel
//! fragment list; slot `1 + L` describes octree level `L`. Each record is
//! readable both as compute dispatch arguments (offset 0) and as
//! non-indexed draw arguments (offset 12), so the same GPU-written count
//! drives compute passes and the instanced debug draw.

use bytemuck::{Pod, Zeroable};

/// Threads per workgroup for every one-dimensional indirect pass.
pub const WORKGROUP_SIZE: u32 = 64;
/// Largest dispatch along one dimension.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65535;
/// Vertices in one debug cube.
pub const CUBE_VERTEX_COUNT: u32 = 36;
/// Slot holding the voxel fragment count.
pub const FRAGMENT_SLOT: u32 = 0;
/// Byte offset of the draw arguments inside a record.
pub const DRAW_ARGS_OFFSET: u64 = 12;

/// Dispatch + draw arguments for one element set - 32 bytes.
///
/// Matches `IndirectArgs` in `shaders/common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectArgsRecord {
    pub dispatch_x: u32,
    pub dispatch_y: u32,
    pub dispatch_z: u32,
    pub vertex_count: u32,
    /// Number of elements (fragments or nodes)
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
    /// Arena index of the first element
    pub first: u32,
}

impl IndirectArgsRecord {
    /// Record covering `count` elements starting at `first`.
    pub fn for_count(count: u32, first: u32) -> Self {
        let [x, y, z] = dispatch_dims(count);
        Self {
            dispatch_x: x,
            dispatch_y: y,
            dispatch_z: z,
            vertex_count: CUBE_VERTEX_COUNT,
            instance_count: count,
            first_vertex: 0,
            first_instance: 0,
            first,
        }
    }

    pub fn count(&self) -> u32 {
        self.instance_count
    }

    /// Element range this record covers.
    pub fn range(&self) -> std::ops::Range<u32> {
        self.first..self.first + self.instance_count
    }
}

/// Workgroup counts for `count` threads, split over two dimensions once the
/// first one is exhausted. Shaders recover the element index as
/// `(wid.y * nwg.x + wid.x) * 64 + lid`.
pub fn dispatch_dims(count: u32) -> [u32; 3] {
    let groups = count.div_ceil(WORKGROUP_SIZE);
    if groups <= MAX_WORKGROUPS_PER_DIM {
        [groups, 1, 1]
    } else {
        [MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM), 1]
    }
}

/// Slot index for octree level `level`.
pub fn level_slot(level: u32) -> u32 {
    1 + level
}

/// Number of records for an octree of `height` levels.
pub fn record_count(height: u32) -> u32 {
    1 + height
}

/// Byte offset of a slot inside the indirect buffer.
pub fn slot_offset(slot: u32) -> u64 {
    slot as u64 * std::mem::size_of::<IndirectArgsRecord>() as u64
}

/// Byte offset of level `level`'s dispatch arguments.
pub fn indirect_args_offset(level: u32) -> u64 {
    slot_offset(level_slot(level))
}

/// Records for an empty octree: no fragments, a lone root at level 0.
pub fn cleared_records(height: u32) -> Vec<IndirectArgsRecord> {
    let mut records = vec![IndirectArgsRecord::for_count(0, 0); record_count(height) as usize];
    records[level_slot(0) as usize] = IndirectArgsRecord::for_count(1, 0);
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<IndirectArgsRecord>(), 32);
    }

    #[test]
    fn test_dispatch_dims() {
        assert_eq!(dispatch_dims(0), [0, 1, 1]);
        assert_eq!(dispatch_dims(1), [1, 1, 1]);
        assert_eq!(dispatch_dims(64), [1, 1, 1]);
        assert_eq!(dispatch_dims(65), [2, 1, 1]);
        let big = 64 * 65535 + 1;
        assert_eq!(dispatch_dims(big), [65535, 2, 1]);
    }

    #[test]
    fn test_offsets() {
        assert_eq!(slot_offset(0), 0);
        assert_eq!(indirect_args_offset(0), 32);
        assert_eq!(indirect_args_offset(3), 128);
        assert_eq!(record_count(8), 9);
    }

    #[test]
    fn test_cleared_records() {
        let records = cleared_records(4);
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].count(), 0);
        assert_eq!(records[1].count(), 1);
        assert_eq!(records[1].range(), 0..1);
        assert_eq!(records[1].dispatch_x, 1);
        assert!(records[2..].iter().all(|r| r.count() == 0));
    }
}
