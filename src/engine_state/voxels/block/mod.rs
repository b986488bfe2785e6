//! # Block Module
//!
//! Block ids, faces and the per-id visual table consumed by the mesher.

pub mod block_side;
pub mod block_visual;

pub use block_side::{BlockSide, FaceMask};
pub use block_visual::{
    BlockId, BlockVisual, BlockVisualTable, MeshProvider, TextureAnimation, VisualFeatures, AIR,
};
