//! # Logical Region
//!
//! The CPU-side mesh cache of one region. Every chunk slot walks the same small
//! state machine:
//!
//! ```text
//! absent --add--> present(dirty) --update--> present(clean)
//!                      ^                           |
//!                      +-------- edit / add -------+
//! present --remove--> absent(dirty) --update--> absent
//! ```
//!
//! A completed update of a slot always bumps its `version` by exactly one, which
//! is all the visual side compares against. Removal goes through the same path,
//! so the GPU copy is cleared like any other change.
//!
//! The dirty counter is an atomic shared through [`LogicalRegion::dirty_counter`],
//! so the scheduler can see which regions have work without touching the region
//! lock a worker may be holding for a whole remesh.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cgmath::Vector3;

use crate::engine_state::rendering::meshing::{MeshResult, VoxelMesher};
use crate::engine_state::voxels::chunk::BlockMemory;
use crate::engine_state::voxels::position::{ChunkPosition, RegionPosition};
use crate::engine_state::voxels::world::{BlockSource, FillState};

/// One chunk slot of a region.
#[derive(Debug)]
pub struct LogicalRegionChunk {
    /// The chunk is loaded in the world.
    pub has_value: bool,
    /// The chunk has no visible geometry (or is absent).
    pub is_empty: bool,
    /// The cached mesh is stale.
    pub update_required: bool,
    /// Incremented once per completed update; wraps.
    pub version: u16,
    /// Slot coordinate inside the region.
    pub local_position: Vector3<u32>,
    /// Chunk coordinate in the world.
    pub world_position: ChunkPosition,
    /// Mesh of the current version, until the uploader has staged it.
    pub mesh: Option<MeshResult>,
}

/// The CPU mesh cache of one region.
#[derive(Debug)]
pub struct LogicalRegion {
    position: RegionPosition,
    region_size: [u32; 3],
    chunks: Vec<LogicalRegionChunk>,
    occupied: usize,
    dirty_count: Arc<AtomicU32>,
    bytes_for_mesh: usize,
}

impl LogicalRegion {
    /// Creates a region with every slot absent.
    pub fn new(position: RegionPosition, region_size: [u32; 3]) -> Self {
        let origin = position.origin_chunk(region_size);
        let [size_x, size_y, size_z] = region_size;
        let mut chunks = Vec::with_capacity((size_x * size_y * size_z) as usize);
        for y in 0..size_y {
            for z in 0..size_z {
                for x in 0..size_x {
                    chunks.push(LogicalRegionChunk {
                        has_value: false,
                        is_empty: true,
                        update_required: false,
                        version: 0,
                        local_position: Vector3::new(x, y, z),
                        world_position: ChunkPosition::new(
                            origin.0.x + x as i32,
                            origin.0.y + y as i32,
                            origin.0.z + z as i32,
                        ),
                        mesh: None,
                    });
                }
            }
        }

        Self {
            position,
            region_size,
            chunks,
            occupied: 0,
            dirty_count: Arc::new(AtomicU32::new(0)),
            bytes_for_mesh: 0,
        }
    }

    /// Slot index of `chunk`, which must belong to this region.
    pub fn slot_index(&self, chunk: ChunkPosition) -> usize {
        debug_assert_eq!(chunk.region(self.region_size), self.position);
        let local = chunk.local_in_region(self.region_size);
        let [size_x, _, size_z] = self.region_size;
        ((local.y * size_z + local.z) * size_x + local.x) as usize
    }

    /// Marks `chunk` present and dirty.
    ///
    /// # Returns
    /// True when the slot was absent before
    pub fn add_chunk(&mut self, chunk: ChunkPosition, is_empty: bool) -> bool {
        let index = self.slot_index(chunk);
        let slot = &mut self.chunks[index];
        let added = !slot.has_value;
        if added {
            slot.has_value = true;
            self.occupied += 1;
        }
        slot.is_empty = is_empty;
        self.mark_dirty(index);
        added
    }

    /// Marks `chunk` absent. The next update clears its mesh and bumps its version.
    ///
    /// # Returns
    /// True when the slot was present before
    pub fn remove_chunk(&mut self, chunk: ChunkPosition) -> bool {
        let index = self.slot_index(chunk);
        let slot = &mut self.chunks[index];
        if !slot.has_value {
            return false;
        }
        slot.has_value = false;
        slot.is_empty = true;
        self.occupied -= 1;
        self.mark_dirty(index);
        true
    }

    /// Marks a present chunk dirty after its blocks or a neighbor's changed.
    /// A chunk already known empty that is still empty is left alone.
    pub fn update_chunk(&mut self, chunk: ChunkPosition, is_empty: bool) {
        let index = self.slot_index(chunk);
        let slot = &mut self.chunks[index];
        if !slot.has_value || (slot.is_empty && is_empty) {
            return;
        }
        slot.is_empty = is_empty;
        self.mark_dirty(index);
    }

    /// Marks every present chunk dirty. Used after the GPU copies were lost.
    pub fn invalidate_all(&mut self) {
        for index in 0..self.chunks.len() {
            if self.chunks[index].has_value {
                self.mark_dirty(index);
            }
        }
    }

    /// Remeshes every dirty slot.
    ///
    /// # Arguments
    /// * `world` - Source of block neighborhoods
    /// * `scratch` - Grid reused for every fetch; its halo must be at least 1
    /// * `mesher` - Mesher producing the cached meshes
    ///
    /// # Returns
    /// True when at least one slot reached a new version
    pub fn update(
        &mut self,
        world: &dyn BlockSource,
        scratch: &mut BlockMemory,
        mesher: &VoxelMesher,
    ) -> bool {
        if self.dirty_count.swap(0, Ordering::AcqRel) == 0 {
            return false;
        }

        let mut retry = 0;
        let mut completed = 0;
        for slot in &mut self.chunks {
            if !slot.update_required {
                continue;
            }

            if !slot.is_empty {
                if world.fetch_block_memory(scratch, slot.world_position.origin_block())
                    == FillState::Partial
                {
                    retry += 1;
                    continue;
                }

                self.bytes_for_mesh -= slot.mesh.as_ref().map_or(0, MeshResult::byte_size);
                slot.mesh = None;
                if scratch.interior_is_empty() {
                    slot.is_empty = true;
                } else {
                    match mesher.mesh(scratch) {
                        Ok(mesh) if !mesh.is_empty() => {
                            self.bytes_for_mesh += mesh.byte_size();
                            slot.mesh = Some(mesh);
                        }
                        Ok(_) => {}
                        Err(error) => {
                            log::error!(
                                "Failed to mesh chunk {:?}: {error}",
                                slot.world_position
                            );
                        }
                    }
                }
            } else {
                self.bytes_for_mesh -= slot.mesh.as_ref().map_or(0, MeshResult::byte_size);
                slot.mesh = None;
            }

            slot.version = slot.version.wrapping_add(1);
            slot.update_required = false;
            completed += 1;
        }

        if retry > 0 {
            log::trace!(
                "Region {:?}: {} chunks waiting on their neighborhood",
                self.position,
                retry
            );
            self.dirty_count.fetch_add(retry, Ordering::AcqRel);
        }
        completed > 0
    }

    /// Drops the cached mesh of slot `index` once the uploader has staged it.
    pub fn release_mesh(&mut self, index: usize) {
        if let Some(mesh) = self.chunks[index].mesh.take() {
            self.bytes_for_mesh -= mesh.byte_size();
        }
    }

    /// All slots, in slot-index order.
    pub fn chunks(&self) -> &[LogicalRegionChunk] {
        &self.chunks
    }

    /// The region's coordinate.
    pub fn position(&self) -> RegionPosition {
        self.position
    }

    /// Present chunks.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// True when no chunk is present.
    pub fn is_vacant(&self) -> bool {
        self.occupied == 0
    }

    /// True when some slot waits for an update.
    pub fn is_dirty(&self) -> bool {
        self.dirty_count.load(Ordering::Acquire) > 0
    }

    /// Slots waiting for an update.
    pub fn dirty_count(&self) -> u32 {
        self.dirty_count.load(Ordering::Acquire)
    }

    /// The shared dirty counter; readable without the region lock.
    ///
    /// It drops to zero while an update runs and regains any slots that update
    /// had to leave for later.
    pub fn dirty_counter(&self) -> Arc<AtomicU32> {
        self.dirty_count.clone()
    }

    /// CPU bytes held by cached meshes.
    pub fn bytes_for_mesh(&self) -> usize {
        self.bytes_for_mesh
    }

    fn mark_dirty(&mut self, index: usize) {
        let slot = &mut self.chunks[index];
        if !slot.update_required {
            slot.update_required = true;
            self.dirty_count.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
#[path = "logical_region_test.rs"]
mod logical_region_test;
