use crate::engine_state::voxels::block::{BlockId, AIR};

use super::CHUNK_DIMENSION;

/// One chunk of block ids plus a halo margin on every side.
///
/// The mesher reads a cell's six neighbors directly from this grid, so faces on a
/// chunk border are culled against the real neighboring blocks without touching
/// other chunks.
///
/// # Layout
/// Ids are stored X-fastest, then Z, then Y:
///
/// `index = x + z * row_stride + y * layer_stride`
///
/// with all coordinates in padded space (`0..dimension()`), so the chunk interior
/// spans `halo..halo + CHUNK_DIMENSION` on each axis. Neighbor lookups are the
/// index offsets `±1`, `±row_stride` and `±layer_stride`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMemory {
    halo: usize,
    dimension: usize,
    row_stride: usize,
    layer_stride: usize,
    ids: Vec<BlockId>,
}

impl BlockMemory {
    /// Allocates an all-air grid with `halo` padding blocks per side.
    pub fn new(halo: usize) -> Self {
        let dimension = CHUNK_DIMENSION as usize + 2 * halo;
        Self {
            halo,
            dimension,
            row_stride: dimension,
            layer_stride: dimension * dimension,
            ids: vec![AIR; dimension * dimension * dimension],
        }
    }

    /// Padding blocks per side.
    pub fn halo(&self) -> usize {
        self.halo
    }

    /// Padded edge length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Index step for `+1` along Z.
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Index step for `+1` along Y.
    pub fn layer_stride(&self) -> usize {
        self.layer_stride
    }

    /// Flat index of a padded coordinate.
    ///
    /// # Panics
    /// When any coordinate is outside `0..dimension()`.
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        assert!(
            x < self.dimension && y < self.dimension && z < self.dimension,
            "({x}, {y}, {z}) outside a {0}³ block grid",
            self.dimension
        );
        x + z * self.row_stride + y * self.layer_stride
    }

    /// Id at a padded coordinate.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.ids[self.index(x, y, z)]
    }

    /// Id at a flat index.
    pub fn get_at(&self, index: usize) -> BlockId {
        self.ids[index]
    }

    /// Writes an id at a padded coordinate.
    pub fn set(&mut self, x: usize, y: usize, z: usize, id: BlockId) {
        let index = self.index(x, y, z);
        self.ids[index] = id;
    }

    /// Writes an id at a chunk-local coordinate, offset by the halo.
    pub fn set_interior(&mut self, x: usize, y: usize, z: usize, id: BlockId) {
        self.set(x + self.halo, y + self.halo, z + self.halo, id);
    }

    /// Overwrites every cell, halo included.
    pub fn fill(&mut self, id: BlockId) {
        self.ids.fill(id);
    }

    /// The whole padded grid.
    pub fn ids(&self) -> &[BlockId] {
        &self.ids
    }

    /// Mutable access to the whole padded grid.
    pub fn ids_mut(&mut self) -> &mut [BlockId] {
        &mut self.ids
    }

    /// True when no interior cell holds anything but air.
    pub fn interior_is_empty(&self) -> bool {
        let interior = self.halo..self.halo + CHUNK_DIMENSION as usize;
        interior.clone().all(|y| {
            interior.clone().all(|z| {
                let row = self.index(self.halo, y, z);
                self.ids[row..row + CHUNK_DIMENSION as usize]
                    .iter()
                    .all(|&id| id == AIR)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_match_layout() {
        let memory = BlockMemory::new(2);
        assert_eq!(memory.dimension(), 20);
        let base = memory.index(5, 6, 7);
        assert_eq!(memory.index(6, 6, 7), base + 1);
        assert_eq!(memory.index(5, 6, 8), base + memory.row_stride());
        assert_eq!(memory.index(5, 7, 7), base + memory.layer_stride());
    }

    #[test]
    fn test_interior_ignores_halo() {
        let mut memory = BlockMemory::new(1);
        memory.set(0, 0, 0, 3);
        assert!(memory.interior_is_empty());
        memory.set_interior(15, 15, 15, 3);
        assert!(!memory.interior_is_empty());
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_index_panics() {
        let memory = BlockMemory::new(2);
        memory.get(20, 0, 0);
    }
}
