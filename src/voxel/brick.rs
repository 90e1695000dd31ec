//! 3x3x3 attribute bricks and the dense volumes that store them
//!
//! Every octree node owns one brick in each volume. The brick is found from
//! the node index alone: node `i` sits at brick cell
//! `(i % n, (i / n) % n, i / n^2)` where `n` bricks fit along each axis.
//! Samples are placed at the corners, edge midpoints, face centers and
//! center of the node's cell, so neighboring bricks duplicate their shared
//! face.
//!
//! Samples are RGBA8 packed into one `u32` texel (`R32Uint` on the GPU).

use serde::{Deserialize, Serialize};

use crate::core::types::UVec3;

/// Samples along each brick axis.
pub const BRICK_SIZE: u32 = 3;
/// Samples per brick.
pub const BRICK_SAMPLES: u32 = BRICK_SIZE * BRICK_SIZE * BRICK_SIZE;

/// Which brick volume a pass reads or writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrickTarget {
    /// Geometric coverage, alpha = occupancy.
    #[default]
    Opacity,
    /// Injected direct light, alpha = lit coverage.
    Irradiance,
}

impl BrickTarget {
    pub fn label(self) -> &'static str {
        match self {
            BrickTarget::Opacity => "opacity",
            BrickTarget::Irradiance => "irradiance",
        }
    }
}

/// Filtering axis for the separable averaging passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Brick sample coordinate for linear sample index `p` in 0..27.
pub fn sample_coord(p: u32) -> UVec3 {
    debug_assert!(p < BRICK_SAMPLES);
    UVec3::new(p % 3, (p / 3) % 3, p / 9)
}

/// Sample of child `octant` that feeds parent sample `q` during a gather.
///
/// Parent sample `q` lies at `q / 2` of the parent cell. Child `o` covers
/// `[o / 2, o / 2 + 1 / 2]`, so its sample nearest to that point is
/// `clamp(2q - 2o, 0, 2)`. Corners map onto the same corner of every child.
pub fn gather_source(q: UVec3, octant: u32) -> UVec3 {
    let o = UVec3::new(octant & 1, (octant >> 1) & 1, (octant >> 2) & 1);
    (q.as_ivec3() * 2 - o.as_ivec3() * 2)
        .clamp(glam::IVec3::ZERO, glam::IVec3::splat(2))
        .as_uvec3()
}

/// Sample `(a, b)` of the face at `side` (0 or 2) perpendicular to `axis`.
pub fn face_sample(axis: Axis, side: u32, a: u32, b: u32) -> UVec3 {
    match axis {
        Axis::X => UVec3::new(side, a, b),
        Axis::Y => UVec3::new(a, side, b),
        Axis::Z => UVec3::new(a, b, side),
    }
}

/// Split a packed RGBA8 sample into integer channels.
pub fn channels(v: u32) -> [u32; 4] {
    [v & 0xFF, (v >> 8) & 0xFF, (v >> 16) & 0xFF, v >> 24]
}

pub fn pack_channels(c: [u32; 4]) -> u32 {
    c[0].min(255) | (c[1].min(255) << 8) | (c[2].min(255) << 16) | (c[3].min(255) << 24)
}

/// Per-channel mean of packed samples, rounded half up.
pub fn rounded_mean(samples: &[u32]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let n = samples.len() as u32;
    let mut sum = [0u32; 4];
    for &s in samples {
        for (acc, c) in sum.iter_mut().zip(channels(s)) {
            *acc += c;
        }
    }
    pack_channels(sum.map(|s| (s + n / 2) / n))
}

/// Addressing of bricks inside a cubic volume of `res^3` texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrickLayout {
    res: u32,
    bricks_per_axis: u32,
}

impl BrickLayout {
    pub fn new(res: u32) -> Self {
        debug_assert!(res >= BRICK_SIZE && res % BRICK_SIZE == 0);
        Self { res, bricks_per_axis: res / BRICK_SIZE }
    }

    pub fn res(&self) -> u32 {
        self.res
    }

    pub fn bricks_per_axis(&self) -> u32 {
        self.bricks_per_axis
    }

    /// Texel origin of `node`'s brick, or None past the volume's capacity.
    pub fn origin(&self, node: u32) -> Option<UVec3> {
        let n = self.bricks_per_axis;
        let cell = UVec3::new(node % n, (node / n) % n, node / (n * n));
        (cell.z < n).then_some(cell * BRICK_SIZE)
    }

    /// Linear texel index of sample `q` of `node`'s brick.
    pub fn texel_index(&self, node: u32, q: UVec3) -> Option<usize> {
        let t = self.origin(node)? + q;
        Some((t.x + t.y * self.res + t.z * self.res * self.res) as usize)
    }
}

/// Host copy of one brick volume, laid out like the GPU texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrickVolume {
    layout: BrickLayout,
    texels: Vec<u32>,
}

impl BrickVolume {
    pub fn new(res: u32) -> Self {
        Self {
            layout: BrickLayout::new(res),
            texels: vec![0; (res as usize).pow(3)],
        }
    }

    /// Wrap texels read back from a `res^3` texture. None if the length
    /// does not match.
    pub fn from_texels(res: u32, texels: Vec<u32>) -> Option<Self> {
        (res >= BRICK_SIZE && res % BRICK_SIZE == 0 && texels.len() == (res as usize).pow(3)).then(|| Self {
            layout: BrickLayout::new(res),
            texels,
        })
    }

    pub fn layout(&self) -> BrickLayout {
        self.layout
    }

    pub fn texels(&self) -> &[u32] {
        &self.texels
    }

    pub fn clear(&mut self) {
        self.texels.fill(0);
    }

    /// Read one sample. Out-of-capacity bricks read as zero.
    pub fn load(&self, node: u32, q: UVec3) -> u32 {
        self.layout
            .texel_index(node, q)
            .map_or(0, |i| self.texels[i])
    }

    /// Write one sample. Out-of-capacity bricks are ignored.
    pub fn store(&mut self, node: u32, q: UVec3, value: u32) {
        if let Some(i) = self.layout.texel_index(node, q) {
            self.texels[i] = value;
        }
    }

    /// All 27 samples of a node's brick in linear sample order.
    pub fn brick(&self, node: u32) -> [u32; BRICK_SAMPLES as usize] {
        std::array::from_fn(|p| self.load(node, sample_coord(p as u32)))
    }

    /// True if any sample of the node's brick is non-zero.
    pub fn is_occupied(&self, node: u32) -> bool {
        self.brick(node).iter().any(|&s| s != 0)
    }
}
