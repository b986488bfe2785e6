//! # Position Types
//!
//! The pipeline works in three integer spaces:
//!
//! * block space: one unit per block, [`BlockPosition`]
//! * chunk space: one unit per `CHUNK_DIMENSION`³ chunk, [`ChunkPosition`]
//! * region space: one unit per configured cuboid of chunks, [`RegionPosition`]
//!
//! Conversions between them use floor division so negative coordinates map to the
//! containing cell instead of rounding toward zero.

use cgmath::{Point3, Vector3};

use super::chunk::CHUNK_DIMENSION;

/// A block coordinate in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPosition(pub Point3<i32>);

/// A chunk coordinate in chunk space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPosition(pub Point3<i32>);

/// A region coordinate in region space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionPosition(pub Point3<i32>);

impl BlockPosition {
    /// Creates a block position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Point3::new(x, y, z))
    }

    /// The chunk containing this block.
    pub fn chunk(&self) -> ChunkPosition {
        ChunkPosition(Point3::new(
            self.0.x.div_euclid(CHUNK_DIMENSION),
            self.0.y.div_euclid(CHUNK_DIMENSION),
            self.0.z.div_euclid(CHUNK_DIMENSION),
        ))
    }

    /// Offset of this block inside its chunk, each axis in `0..CHUNK_DIMENSION`.
    pub fn local(&self) -> Vector3<usize> {
        Vector3::new(
            self.0.x.rem_euclid(CHUNK_DIMENSION) as usize,
            self.0.y.rem_euclid(CHUNK_DIMENSION) as usize,
            self.0.z.rem_euclid(CHUNK_DIMENSION) as usize,
        )
    }
}

impl ChunkPosition {
    /// Creates a chunk position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Point3::new(x, y, z))
    }

    /// The block at the minimum corner of this chunk.
    pub fn origin_block(&self) -> BlockPosition {
        BlockPosition(self.0 * CHUNK_DIMENSION)
    }

    /// The region containing this chunk for a given region size.
    pub fn region(&self, region_size: [u32; 3]) -> RegionPosition {
        RegionPosition(Point3::new(
            self.0.x.div_euclid(region_size[0] as i32),
            self.0.y.div_euclid(region_size[1] as i32),
            self.0.z.div_euclid(region_size[2] as i32),
        ))
    }

    /// Offset of this chunk inside its region.
    pub fn local_in_region(&self, region_size: [u32; 3]) -> Vector3<u32> {
        Vector3::new(
            self.0.x.rem_euclid(region_size[0] as i32) as u32,
            self.0.y.rem_euclid(region_size[1] as i32) as u32,
            self.0.z.rem_euclid(region_size[2] as i32) as u32,
        )
    }

    /// The six face-adjacent chunks.
    pub fn neighbors(&self) -> [ChunkPosition; 6] {
        let p = self.0;
        [
            ChunkPosition::new(p.x - 1, p.y, p.z),
            ChunkPosition::new(p.x + 1, p.y, p.z),
            ChunkPosition::new(p.x, p.y - 1, p.z),
            ChunkPosition::new(p.x, p.y + 1, p.z),
            ChunkPosition::new(p.x, p.y, p.z - 1),
            ChunkPosition::new(p.x, p.y, p.z + 1),
        ]
    }
}

impl RegionPosition {
    /// Creates a region position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Point3::new(x, y, z))
    }

    /// The chunk at the minimum corner of this region.
    pub fn origin_chunk(&self, region_size: [u32; 3]) -> ChunkPosition {
        ChunkPosition::new(
            self.0.x * region_size[0] as i32,
            self.0.y * region_size[1] as i32,
            self.0.z * region_size[2] as i32,
        )
    }

    /// Manhattan distance from the region's center to `chunk`, in half-chunk units.
    ///
    /// Doubling keeps the center of even-sized regions on the integer grid.
    pub fn doubled_center_distance(&self, chunk: ChunkPosition, region_size: [u32; 3]) -> u64 {
        let origin = self.origin_chunk(region_size).0;
        let axis = |min: i32, size: u32, target: i32| -> u64 {
            ((2 * min as i64 + size as i64) - 2 * target as i64).unsigned_abs()
        };
        axis(origin.x, region_size[0], chunk.0.x)
            + axis(origin.y, region_size[1], chunk.0.y)
            + axis(origin.z, region_size[2], chunk.0.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_chunks_map_to_containing_region() {
        let size = [4, 3, 4];
        let chunk = ChunkPosition::new(-1, -4, 5);
        assert_eq!(chunk.region(size), RegionPosition::new(-1, -2, 1));
        assert_eq!(chunk.local_in_region(size), Vector3::new(3, 2, 1));
    }

    #[test]
    fn test_block_to_chunk_uses_floor_division() {
        let block = BlockPosition::new(-1, 16, 15);
        assert_eq!(block.chunk(), ChunkPosition::new(-1, 1, 0));
        assert_eq!(block.local(), Vector3::new(15, 0, 15));
    }

    #[test]
    fn test_center_distance_prefers_containing_region() {
        let size = [4, 3, 4];
        let player = ChunkPosition::new(2, 1, 2);
        let home = RegionPosition::new(0, 0, 0);
        let far = RegionPosition::new(3, 0, 0);
        assert!(home.doubled_center_distance(player, size) < far.doubled_center_distance(player, size));
    }
}
