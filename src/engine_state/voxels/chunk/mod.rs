//! # Chunk Module
//!
//! Dense storage for one `CHUNK_DIMENSION`³ cube of block ids, plus the terrain
//! generators used to populate the in-memory world.
//!
//! ## Layout
//!
//! `ChunkBlocks` uses the same axis order as [`BlockMemory`]: X fastest, then Z,
//! then Y. Copying a chunk into the halo grid is therefore a sequence of row
//! copies of `CHUNK_DIMENSION` ids each.

use cgmath::Point3;
use noise::{NoiseFn, Perlin};

use super::block::{BlockId, AIR};
use super::position::ChunkPosition;

pub mod block_memory;

pub use block_memory::BlockMemory;

/// The dimension (width, height, depth) of a chunk in blocks.
pub const CHUNK_DIMENSION: i32 = 16;
/// The number of blocks in a single 2D plane of a chunk (CHUNK_DIMENSION²).
pub const CHUNK_PLANE_SIZE: i32 = CHUNK_DIMENSION * CHUNK_DIMENSION;
/// The total number of blocks in a chunk (CHUNK_DIMENSION³).
pub const CHUNK_SIZE: i32 = CHUNK_PLANE_SIZE * CHUNK_DIMENSION;

/// Threshold above which Perlin noise is considered solid for terrain generation.
pub const PERLIN_POSITIVE_THRESHOLD: f64 = 0.2;
/// Threshold below which Perlin noise is considered solid for terrain generation.
pub const PERLIN_NEGATIVE_THRESHOLD: f64 = -0.2;
/// Scaling factor applied to world coordinates when sampling Perlin noise.
pub const PERLIN_SCALE_FACTOR: f64 = 0.02;

/// Block ids of one chunk, X-fastest then Z then Y.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBlocks {
    ids: Vec<BlockId>,
}

impl ChunkBlocks {
    /// A chunk of air.
    pub fn empty() -> Self {
        Self::filled(AIR)
    }

    /// A chunk made entirely of `id`.
    pub fn filled(id: BlockId) -> Self {
        Self {
            ids: vec![id; CHUNK_SIZE as usize],
        }
    }

    /// Random sparse blocks with ids in `1..=max_id`; roughly one block in ten is solid.
    pub fn random(rng: &mut fastrand::Rng, max_id: BlockId) -> Self {
        let mut chunk = Self::empty();
        for id in chunk.ids.iter_mut() {
            if rng.f64() >= 0.9 {
                *id = rng.u16(1..=max_id.max(1));
            }
        }
        chunk
    }

    /// Terrain from 3D Perlin noise, sampled at world block coordinates.
    ///
    /// Cells whose noise sample leaves the `[PERLIN_NEGATIVE_THRESHOLD,
    /// PERLIN_POSITIVE_THRESHOLD]` band become solid, giving caves and overhangs.
    pub fn perlin(position: ChunkPosition, seed: u32, max_id: BlockId) -> Self {
        let perlin = Perlin::new(seed);
        let origin = position.origin_block().0;
        let mut chunk = Self::empty();

        for y in 0..CHUNK_DIMENSION {
            for z in 0..CHUNK_DIMENSION {
                for x in 0..CHUNK_DIMENSION {
                    let block = Point3::new(origin.x + x, origin.y + y, origin.z + z);
                    let sample = perlin.get(Self::to_perlin_pos(block, PERLIN_SCALE_FACTOR));
                    if !(PERLIN_NEGATIVE_THRESHOLD..=PERLIN_POSITIVE_THRESHOLD).contains(&sample) {
                        let id = 1 + (block.y.rem_euclid(max_id.max(1) as i32)) as BlockId;
                        chunk.set(x as usize, y as usize, z as usize, id);
                    }
                }
            }
        }

        chunk
    }

    /// A 3D checkerboard of `id` and air.
    pub fn checkerboard(id: BlockId) -> Self {
        let mut chunk = Self::empty();
        for y in 0..CHUNK_DIMENSION as usize {
            for z in 0..CHUNK_DIMENSION as usize {
                for x in 0..CHUNK_DIMENSION as usize {
                    if (x + y + z) % 2 == 0 {
                        chunk.set(x, y, z, id);
                    }
                }
            }
        }
        chunk
    }

    fn to_perlin_pos(pos: Point3<i32>, scale_factor: f64) -> [f64; 3] {
        [
            pos.x as f64 * scale_factor,
            pos.y as f64 * scale_factor,
            pos.z as f64 * scale_factor,
        ]
    }

    fn index(x: usize, y: usize, z: usize) -> usize {
        let dimension = CHUNK_DIMENSION as usize;
        assert!(x < dimension && y < dimension && z < dimension);
        x + z * dimension + y * dimension * dimension
    }

    /// Id at a chunk-local coordinate.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.ids[Self::index(x, y, z)]
    }

    /// Writes an id at a chunk-local coordinate.
    pub fn set(&mut self, x: usize, y: usize, z: usize, id: BlockId) {
        self.ids[Self::index(x, y, z)] = id;
    }

    /// One X row at local `(y, z)`.
    pub fn row(&self, y: usize, z: usize) -> &[BlockId] {
        let start = Self::index(0, y, z);
        &self.ids[start..start + CHUNK_DIMENSION as usize]
    }

    /// True when the chunk holds only air.
    pub fn is_empty(&self) -> bool {
        self.ids.iter().all(|&id| id == AIR)
    }
}
