use std::fmt;
use std::ops::{Add, Sub};

/// Identifies one connected peer. `0` is reserved for "no peer" (anonymous
/// emerge requests and the like).
pub type PeerId = u16;

/// The reserved "no peer" id.
pub const PEER_ID_INEXISTENT: PeerId = 0;

/// Identifies one server-side active object.
pub type ObjectId = u16;

/// Edge length of a map block, in nodes.
pub const MAP_BLOCKSIZE: i16 = 16;

/// World units per node.
pub const BS: f32 = 10.0;

/// Edge length of a far block, in map blocks.
pub const FAR_SCALE: i16 = 8;

/// Shell radius up to which per-tick send limits are never reduced.
pub const CLOSE_LIMIT_RADIUS: i16 = 1;

/// Reduced in-flight cap applied right after building activity.
pub const LIMITED_SIMUL: usize = 2;

/// Hard map extent, in nodes, on each axis.
pub const MAP_GENERATION_LIMIT: i32 = 31000;

/// Largest bounding-sphere radius of a unit block, as a factor of its edge
/// length (sqrt(3) / 2).
pub const BLOCK_MAX_RADIUS_FACTOR: f32 = 0.866_025_4;

/// Position of one map block on the block lattice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl BlockPos {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Maps this position into a lattice that is `scale` times coarser,
    /// flooring toward negative infinity on each axis.
    pub fn container_pos(self, scale: i16) -> Self {
        let scale = i32::from(scale);
        Self {
            x: i32::from(self.x).div_euclid(scale) as i16,
            y: i32::from(self.y).div_euclid(scale) as i16,
            z: i32::from(self.z).div_euclid(scale) as i16,
        }
    }

    /// Multiplies each component by `scale`.
    pub fn scaled(self, scale: i16) -> Self {
        Self {
            x: self.x.saturating_mul(scale),
            y: self.y.saturating_mul(scale),
            z: self.z.saturating_mul(scale),
        }
    }

    /// Whether any coordinate lies outside the hard map limits. Over-limit
    /// positions are never dispatched.
    pub fn over_limit(self) -> bool {
        const LIMIT: i16 = (MAP_GENERATION_LIMIT / MAP_BLOCKSIZE as i32) as i16;
        self.x < -LIMIT
            || self.x > LIMIT
            || self.y < -LIMIT
            || self.y > LIMIT
            || self.z < -LIMIT
            || self.z > LIMIT
    }
}

impl Add for BlockPos {
    type Output = BlockPos;

    fn add(self, other: BlockPos) -> BlockPos {
        BlockPos {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
            z: self.z.wrapping_add(other.z),
        }
    }
}

impl Sub for BlockPos {
    type Output = BlockPos;

    fn sub(self, other: BlockPos) -> BlockPos {
        BlockPos {
            x: self.x.wrapping_sub(other.x),
            y: self.y.wrapping_sub(other.y),
            z: self.z.wrapping_sub(other.z),
        }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}
