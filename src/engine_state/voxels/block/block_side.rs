//! # Block Side Module
//!
//! This module defines the six faces of a voxel block and the bit mask used to
//! carry sets of faces through face culling.

use bitflags::bitflags;
use cgmath::Vector3;
use serde::{Deserialize, Serialize};

/// One of the six axis-aligned faces of a block.
///
/// The discriminant is the bit index of the face in a [`FaceMask`]. The order is
/// left, right, bottom, top, front, back; opposite faces are adjacent pairs.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BlockSide {
    /// Facing negative X
    LEFT = 0,

    /// Facing positive X
    RIGHT = 1,

    /// Facing negative Y
    BOTTOM = 2,

    /// Facing positive Y
    TOP = 3,

    /// Facing negative Z
    FRONT = 4,

    /// Facing positive Z
    BACK = 5,
}

bitflags! {
    /// A set of block faces.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FaceMask: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const BOTTOM = 1 << 2;
        const TOP = 1 << 3;
        const FRONT = 1 << 4;
        const BACK = 1 << 5;
    }
}

impl BlockSide {
    /// All six faces in bit order.
    pub fn all() -> [BlockSide; 6] {
        [
            BlockSide::LEFT,
            BlockSide::RIGHT,
            BlockSide::BOTTOM,
            BlockSide::TOP,
            BlockSide::FRONT,
            BlockSide::BACK,
        ]
    }

    /// The face pointing the other way along the same axis.
    pub fn opposite(self) -> BlockSide {
        match self {
            BlockSide::LEFT => BlockSide::RIGHT,
            BlockSide::RIGHT => BlockSide::LEFT,
            BlockSide::BOTTOM => BlockSide::TOP,
            BlockSide::TOP => BlockSide::BOTTOM,
            BlockSide::FRONT => BlockSide::BACK,
            BlockSide::BACK => BlockSide::FRONT,
        }
    }

    /// Outward unit normal of the face.
    pub fn normal(self) -> Vector3<i8> {
        match self {
            BlockSide::LEFT => Vector3::new(-1, 0, 0),
            BlockSide::RIGHT => Vector3::new(1, 0, 0),
            BlockSide::BOTTOM => Vector3::new(0, -1, 0),
            BlockSide::TOP => Vector3::new(0, 1, 0),
            BlockSide::FRONT => Vector3::new(0, 0, -1),
            BlockSide::BACK => Vector3::new(0, 0, 1),
        }
    }

    /// The single-face mask for this side.
    pub fn mask(self) -> FaceMask {
        FaceMask::from_bits_truncate(1 << self as u8)
    }
}

impl FaceMask {
    /// Mirrors every face to its opposite.
    ///
    /// A block that blocks its own `RIGHT` face hides the `LEFT` face of the block
    /// to its right, so table lookups during culling use the mirrored mask.
    pub fn opposite(self) -> FaceMask {
        BlockSide::all()
            .into_iter()
            .filter(|side| self.contains(side.mask()))
            .fold(FaceMask::empty(), |mask, side| mask | side.opposite().mask())
    }

    /// Iterates the faces in the mask in bit order.
    pub fn sides(self) -> impl Iterator<Item = BlockSide> {
        BlockSide::all()
            .into_iter()
            .filter(move |side| self.contains(side.mask()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_mask_mirrors_each_axis() {
        let mask = FaceMask::LEFT | FaceMask::TOP | FaceMask::BACK;
        assert_eq!(mask.opposite(), FaceMask::RIGHT | FaceMask::BOTTOM | FaceMask::FRONT);
        assert_eq!(FaceMask::all().opposite(), FaceMask::all());
    }

    #[test]
    fn test_normals_of_opposites_cancel() {
        for side in BlockSide::all() {
            assert_eq!(side.normal() + side.opposite().normal(), Vector3::new(0, 0, 0));
        }
    }
}
