//! # Voxel Meshing
//!
//! Turns a halo-padded [`BlockMemory`] into a [`MeshResult`]: one quad per visible
//! block face, with faces hidden by blocking neighbors culled away.
//!
//! ## Algorithm
//!
//! For every interior cell, Y outer, Z middle, X inner (the storage order of the
//! grid, so each row is a contiguous run):
//!
//! 1. Look up the block's visuals. Blocks without a mesh provider are skipped.
//! 2. For `CULL_BY_FACE` blocks, start from all six faces and remove each face
//!    whose neighbor hides it. Neighbors are read at the index offsets `±1`,
//!    `±row_stride` and `±layer_stride`; the halo guarantees they exist.
//! 3. `SKIP_IF_OBSTRUCTED` blocks with no surviving face are skipped.
//! 4. Each surviving face appends 4 geometry vertices, 4 paint vertices and 6
//!    indices.
//!
//! ## Failure
//!
//! Errors abort the mesh. The partially built `MeshResult` is dropped on the way
//! out, which returns all three of its buffers to the pool.
//!
//! ## Performance Considerations
//!
//! The mesher holds no per-call state, so one instance is shared by every region
//! on a thread and a single [`BlockMemory`] scratch grid is reused across calls.

use std::sync::Arc;

use thiserror::Error;

use crate::engine_state::memory::PooledAllocator;
use crate::engine_state::rendering::vertex::{GeometryVertex, PaintVertex};
use crate::engine_state::voxels::block::{
    BlockId, BlockSide, BlockVisualTable, FaceMask, MeshProvider, VisualFeatures,
};
use crate::engine_state::voxels::chunk::{BlockMemory, CHUNK_DIMENSION};

pub mod face;
pub mod mesh_result;

pub use mesh_result::MeshResult;

/// Reasons a chunk could not be meshed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    /// The grid contains an id missing from the visual table.
    #[error("block id {id} at ({x}, {y}, {z}) has no visual description")]
    UnknownBlock {
        /// The offending id.
        id: BlockId,
        /// Chunk-local X.
        x: usize,
        /// Chunk-local Y.
        y: usize,
        /// Chunk-local Z.
        z: usize,
    },

    /// Face culling needs at least one halo block on every side.
    #[error("block grid has no halo; neighbors cannot be read")]
    MissingHalo,
}

/// Builds chunk meshes from block grids.
#[derive(Clone)]
pub struct VoxelMesher {
    table: Arc<BlockVisualTable>,
    pool: Arc<PooledAllocator>,
}

impl VoxelMesher {
    /// Creates a mesher reading visuals from `table` and buffers from `pool`.
    pub fn new(table: Arc<BlockVisualTable>, pool: Arc<PooledAllocator>) -> Self {
        Self { table, pool }
    }

    /// The pool meshes allocate from.
    pub fn pool(&self) -> &Arc<PooledAllocator> {
        &self.pool
    }

    /// Meshes the interior of `memory`.
    ///
    /// # Returns
    /// The chunk's geometry; empty when nothing is visible
    ///
    /// # Errors
    /// [`MeshError`] when the grid cannot be meshed; no buffers are leaked
    pub fn mesh(&self, memory: &BlockMemory) -> Result<MeshResult, MeshError> {
        let halo = memory.halo();
        if halo == 0 {
            return Err(MeshError::MissingHalo);
        }

        let row = memory.row_stride() as isize;
        let layer = memory.layer_stride() as isize;
        let neighbor_offsets: [isize; 6] = [-1, 1, -layer, layer, -row, row];
        let dimension = CHUNK_DIMENSION as usize;

        let mut result = MeshResult::new(self.pool.clone());

        for y in 0..dimension {
            for z in 0..dimension {
                let row_start = memory.index(halo, y + halo, z + halo);
                for x in 0..dimension {
                    let index = row_start + x;
                    let id = memory.get_at(index);
                    let visual = self
                        .table
                        .get(id)
                        .ok_or(MeshError::UnknownBlock { id, x, y, z })?;
                    let Some(provider) = visual.provider else {
                        continue;
                    };

                    let mut mask = FaceMask::all();
                    if visual.features.contains(VisualFeatures::CULL_BY_FACE) {
                        for side in BlockSide::all() {
                            let neighbor_index =
                                index.wrapping_add_signed(neighbor_offsets[side as usize]);
                            let neighbor = memory.get_at(neighbor_index);
                            if self
                                .table
                                .opposite_blocking_faces(neighbor)
                                .contains(side.mask())
                            {
                                mask.remove(side.mask());
                            }
                        }
                    }

                    if mask.is_empty()
                        && visual.features.contains(VisualFeatures::SKIP_IF_OBSTRUCTED)
                    {
                        continue;
                    }

                    let emissive = visual.features.contains(VisualFeatures::EMITS_LIGHT);
                    emit_faces(&mut result, [x, y, z], mask, &provider, emissive);
                }
            }
        }

        result.trim();
        Ok(result)
    }
}

fn emit_faces(
    result: &mut MeshResult,
    cell: [usize; 3],
    mask: FaceMask,
    provider: &MeshProvider,
    emissive: bool,
) {
    result.prepare_faces(mask.bits().count_ones() as usize);
    let descriptor = provider.animation.descriptor(emissive);

    for side in mask.sides() {
        let base = result.vertex_count();
        let normal = face::quantized_normal(side);
        let texture_region = provider.region_for(side);

        for (corner_index, [cx, cy, cz]) in face::corners(side).iter().enumerate() {
            let geometry = GeometryVertex {
                position: [
                    cell[0] as u8 + cx,
                    cell[1] as u8 + cy,
                    cell[2] as u8 + cz,
                    0,
                ],
                normal,
            };
            let paint = PaintVertex {
                animation: descriptor | (corner_index as u32) << 16,
                texture_region,
            };
            result.push_vertex(geometry, paint);
        }

        result.push_indices(&face::QUAD_INDICES.map(|index| base + index));
    }
}
