use crate::types::{BlockPos, FAR_SCALE};

/// The atomic unit of map transmission.
///
/// `Near` is a full-fidelity map block; `Far` is a downsampled aggregate
/// covering the `FAR_SCALE`-cubed region of map blocks starting at
/// `pos * FAR_SCALE`. Two targets are equal iff their kind and position
/// match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendTarget {
    Near(BlockPos),
    Far(BlockPos),
}

impl SendTarget {
    /// Position on this target's own lattice.
    pub fn pos(&self) -> BlockPos {
        match *self {
            SendTarget::Near(p) | SendTarget::Far(p) => p,
        }
    }

    /// Representative map-block position: the position itself for a near
    /// block, the lattice-corner block for a far block. Map lookups and
    /// emerge requests always use this.
    pub fn map_pos(&self) -> BlockPos {
        match *self {
            SendTarget::Near(p) => p,
            SendTarget::Far(p) => p.scaled(FAR_SCALE),
        }
    }

    /// Lattice coarseness in map blocks.
    pub fn scale(&self) -> i16 {
        match *self {
            SendTarget::Near(_) => 1,
            SendTarget::Far(_) => FAR_SCALE,
        }
    }

    pub fn is_far(&self) -> bool {
        matches!(self, SendTarget::Far(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn far_targets_project_to_the_lattice_corner() {
        let far = SendTarget::Far(BlockPos::new(2, -1, 0));
        assert_eq!(far.map_pos(), BlockPos::new(16, -8, 0));
        assert_eq!(far.scale(), FAR_SCALE);

        let near = SendTarget::Near(BlockPos::new(2, -1, 0));
        assert_eq!(near.map_pos(), BlockPos::new(2, -1, 0));
        assert_eq!(near.scale(), 1);
    }

    #[test]
    fn kinds_with_the_same_position_differ() {
        let p = BlockPos::new(1, 2, 3);
        assert_ne!(SendTarget::Near(p), SendTarget::Far(p));
    }
}
