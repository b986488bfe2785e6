//! # Block Visual Table
//!
//! Everything the mesher needs to know about a block id, precomputed once per id:
//!
//! * [`VisualFeatures`] flags controlling culling and lighting
//! * the faces of *neighbors* this block hides, stored already mirrored so a cull
//!   test is a single mask lookup
//! * an optional [`MeshProvider`] describing how a visible face is painted
//!
//! Id `0` is always air: no provider, blocks nothing.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::block_side::{BlockSide, FaceMask};

/// Block id stored in chunk grids.
pub type BlockId = u16;

/// The id of empty space.
pub const AIR: BlockId = 0;

bitflags! {
    /// Per-block switches read by the mesher.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct VisualFeatures: u8 {
        /// Faces hidden by a blocking neighbor are dropped.
        const CULL_BY_FACE = 1 << 0;
        /// A block with no surviving face emits nothing at all.
        const SKIP_IF_OBSTRUCTED = 1 << 1;
        /// Paint vertices carry the emissive bit.
        const EMITS_LIGHT = 1 << 2;
    }
}

/// Texture animation for a block face: `frame_count` frames starting at the face's
/// texture region, advancing every `frame_ticks` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextureAnimation {
    /// Number of frames; values below 2 mean a static texture.
    pub frame_count: u8,
    /// Ticks per frame.
    pub frame_ticks: u8,
}

/// Bit set in the packed animation descriptor of emissive blocks.
pub const ANIMATION_EMISSIVE_BIT: u32 = 1 << 31;

impl TextureAnimation {
    /// Packs the animation into the paint vertex descriptor.
    ///
    /// Layout: bits 0..8 frame count, 8..16 frame ticks, bit 31 emissive. Bits
    /// 16..18 are left for the quad corner written by the mesher.
    pub fn descriptor(&self, emissive: bool) -> u32 {
        let mut packed = self.frame_count as u32 | (self.frame_ticks as u32) << 8;
        if emissive {
            packed |= ANIMATION_EMISSIVE_BIT;
        }
        packed
    }
}

/// How the visible faces of a block are painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshProvider {
    /// Texture region index per face, in [`BlockSide`] order.
    pub face_regions: [u32; 6],
    /// Shared animation of all faces.
    pub animation: TextureAnimation,
}

impl MeshProvider {
    /// A provider painting every face with the same texture region.
    pub fn uniform(texture_region: u32) -> Self {
        Self {
            face_regions: [texture_region; 6],
            animation: TextureAnimation::default(),
        }
    }

    /// Texture region of one face.
    pub fn region_for(&self, side: BlockSide) -> u32 {
        self.face_regions[side as usize]
    }
}

/// Static description of one block id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVisual {
    /// Culling and lighting switches.
    pub features: VisualFeatures,
    /// Faces of this block that fully hide whatever touches them.
    pub blocking_faces: FaceMask,
    /// `None` for blocks that are never drawn.
    pub provider: Option<MeshProvider>,
}

impl BlockVisual {
    /// Invisible, non-blocking space.
    pub const fn air() -> Self {
        Self {
            features: VisualFeatures::empty(),
            blocking_faces: FaceMask::empty(),
            provider: None,
        }
    }

    /// A full opaque cube that culls and is culled by its neighbors.
    pub fn opaque(texture_region: u32) -> Self {
        Self {
            features: VisualFeatures::CULL_BY_FACE | VisualFeatures::SKIP_IF_OBSTRUCTED,
            blocking_faces: FaceMask::all(),
            provider: Some(MeshProvider::uniform(texture_region)),
        }
    }

    /// A see-through cube: drawn with all faces, hides nothing.
    pub fn transparent(texture_region: u32) -> Self {
        Self {
            features: VisualFeatures::empty(),
            blocking_faces: FaceMask::empty(),
            provider: Some(MeshProvider::uniform(texture_region)),
        }
    }
}

/// Lookup table from block id to its visuals, with mirrored blocking masks.
#[derive(Debug, Clone)]
pub struct BlockVisualTable {
    visuals: Vec<BlockVisual>,
    opposite_blocking_faces: Vec<FaceMask>,
}

impl BlockVisualTable {
    /// Builds a table; index `i` describes block id `i`.
    ///
    /// Id `0` is forced to air whatever the input says.
    pub fn new(mut visuals: Vec<BlockVisual>) -> Self {
        if visuals.is_empty() {
            visuals.push(BlockVisual::air());
        } else {
            visuals[AIR as usize] = BlockVisual::air();
        }
        let opposite_blocking_faces = visuals
            .iter()
            .map(|visual| visual.blocking_faces.opposite())
            .collect();
        Self {
            visuals,
            opposite_blocking_faces,
        }
    }

    /// Air plus `count` opaque block types, id `n` using texture region `n`.
    pub fn with_opaque_blocks(count: u16) -> Self {
        let mut visuals = vec![BlockVisual::air()];
        visuals.extend((1..=count as u32).map(BlockVisual::opaque));
        Self::new(visuals)
    }

    /// Visuals of `id`, or `None` for ids past the table.
    pub fn get(&self, id: BlockId) -> Option<&BlockVisual> {
        self.visuals.get(id as usize)
    }

    /// Faces of the *adjacent* block hidden by `id`, i.e. its blocking mask mirrored.
    ///
    /// Unknown ids block nothing.
    pub fn opposite_blocking_faces(&self, id: BlockId) -> FaceMask {
        self.opposite_blocking_faces
            .get(id as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Number of ids described.
    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    /// Always false; air is always present.
    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }
}
