//! Voxel fragments produced by the voxelizer

use bytemuck::{Pod, Zeroable};

use crate::core::types::{UVec3, Vec3, Vec4};

/// Bits per axis in a packed fragment position.
pub const POSITION_BITS: u32 = 10;
const POSITION_MASK: u32 = (1 << POSITION_BITS) - 1;
const NORMAL_MAX: f32 = 1023.0;

/// One covered voxel emitted during rasterization - 16 bytes.
///
/// Matches `VoxelFragment` in `shaders/common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VoxelFragment {
    /// Grid position, 10 bits per axis (x | y << 10 | z << 20)
    pub position: u32,
    /// Albedo as RGBA8 (r in the low byte)
    pub color: u32,
    /// Unit normal, 10 bits per axis remapped from [-1, 1]
    pub normal: u32,
    _pad: u32,
}

impl VoxelFragment {
    pub fn new(voxel: UVec3, color: Vec4, normal: Vec3) -> Self {
        Self {
            position: pack_position(voxel),
            color: pack_rgba8(color),
            normal: encode_normal(normal),
            _pad: 0,
        }
    }

    pub fn voxel(&self) -> UVec3 {
        unpack_position(self.position)
    }

    pub fn albedo(&self) -> Vec4 {
        unpack_rgba8(self.color)
    }

    pub fn normal(&self) -> Vec3 {
        decode_normal(self.normal)
    }
}

/// Pack a grid position. Each axis must be below 1024.
pub fn pack_position(voxel: UVec3) -> u32 {
    debug_assert!(voxel.max_element() <= POSITION_MASK);
    (voxel.x & POSITION_MASK)
        | ((voxel.y & POSITION_MASK) << POSITION_BITS)
        | ((voxel.z & POSITION_MASK) << (2 * POSITION_BITS))
}

pub fn unpack_position(packed: u32) -> UVec3 {
    UVec3::new(
        packed & POSITION_MASK,
        (packed >> POSITION_BITS) & POSITION_MASK,
        (packed >> (2 * POSITION_BITS)) & POSITION_MASK,
    )
}

/// Same rounding as WGSL `pack4x8unorm`.
pub fn pack_rgba8(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + Vec4::splat(0.5)).floor();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | ((c.w as u32) << 24)
}

pub fn unpack_rgba8(packed: u32) -> Vec4 {
    Vec4::new(
        (packed & 0xFF) as f32,
        ((packed >> 8) & 0xFF) as f32,
        ((packed >> 16) & 0xFF) as f32,
        (packed >> 24) as f32,
    ) / 255.0
}

pub fn encode_normal(n: Vec3) -> u32 {
    let u = ((n.clamp(Vec3::NEG_ONE, Vec3::ONE) * 0.5 + Vec3::splat(0.5)) * NORMAL_MAX + Vec3::splat(0.5))
        .floor();
    (u.x as u32) | ((u.y as u32) << 10) | ((u.z as u32) << 20)
}

pub fn decode_normal(packed: u32) -> Vec3 {
    let u = Vec3::new(
        (packed & 0x3FF) as f32,
        ((packed >> 10) & 0x3FF) as f32,
        ((packed >> 20) & 0x3FF) as f32,
    );
    (u / NORMAL_MAX * 2.0 - Vec3::ONE).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size() {
        assert_eq!(std::mem::size_of::<VoxelFragment>(), 16);
    }

    #[test]
    fn test_position_packing() {
        let v = UVec3::new(511, 0, 300);
        assert_eq!(unpack_position(pack_position(v)), v);
        assert_eq!(pack_position(UVec3::new(1, 2, 3)), 1 | (2 << 10) | (3 << 20));
    }

    #[test]
    fn test_rgba8_channel_order() {
        let packed = pack_rgba8(Vec4::new(1.0, 0.0, 0.0, 0.5));
        assert_eq!(packed & 0xFF, 255);
        assert_eq!(packed >> 24, 128);
        assert_eq!(pack_rgba8(Vec4::splat(2.0)), u32::MAX);
    }

    #[test]
    fn test_normal_precision() {
        for n in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.6, -0.48, 0.64)] {
            let decoded = decode_normal(encode_normal(n));
            assert!(decoded.dot(n) > 0.999, "{n} decoded as {decoded}");
        }
    }
}
