//! Corner tables for emitting one unit quad per visible block face.
//!
//! Corners are listed so that the triangles `(0, 1, 2)` and `(0, 2, 3)` wind
//! counter-clockwise when the face is seen from outside the block.

use crate::engine_state::voxels::block::BlockSide;

/// Unit-cube corner offsets per face, indexed by [`BlockSide`].
pub const FACE_CORNERS: [[[u8; 3]; 4]; 6] = [
    // LEFT (-X)
    [[0, 0, 0], [0, 0, 1], [0, 1, 1], [0, 1, 0]],
    // RIGHT (+X)
    [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]],
    // BOTTOM (-Y)
    [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]],
    // TOP (+Y)
    [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]],
    // FRONT (-Z)
    [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]],
    // BACK (+Z)
    [[0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1]],
];

/// Index pattern of one quad, relative to its first vertex.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Corner offsets of one face.
pub fn corners(side: BlockSide) -> &'static [[u8; 3]; 4] {
    &FACE_CORNERS[side as usize]
}

/// Quantized outward normal of a face.
pub fn quantized_normal(side: BlockSide) -> [i8; 4] {
    let normal = side.normal();
    [normal.x * 127, normal.y * 127, normal.z * 127, 0]
}
