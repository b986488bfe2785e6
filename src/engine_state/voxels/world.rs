//! # World Module
//!
//! The streaming pipeline does not own block data. It reads it through the
//! [`BlockSource`] trait and learns about changes from [`ChunkEvent`]s. This module
//! defines that seam and provides [`MemoryWorld`], a sparse in-memory implementation
//! used by the demo binary and the tests.
//!
//! ## Architecture
//!
//! `MemoryWorld` keeps each chunk in a [`RefCounted`] cell. The world's map holds
//! one reference; a fetch tracks every chunk it will read while holding the map's
//! read lock, then copies blocks after releasing it. A chunk removed or replaced
//! mid-copy is therefore never observed half destroyed: its data lives until the
//! fetch releases its tracked handle.
//!
//! Edits are copy-on-write. Changing a block replaces the chunk cell, so concurrent
//! readers keep a consistent snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use cgmath::Vector3;

use crate::core::{RefCounted, TrackedHandle};

use super::block::{BlockId, AIR};
use super::chunk::{BlockMemory, ChunkBlocks, CHUNK_DIMENSION};
use super::events::{ChunkEvent, ChunkEventSender};
use super::position::{BlockPosition, ChunkPosition};

/// Outcome of a neighborhood fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    /// Every block in the padded grid reflects the world.
    Filled,
    /// Some of the neighborhood is not available yet; the grid must not be meshed.
    Partial,
}

/// Read access to block data, as needed by the mesher.
pub trait BlockSource: Send + Sync {
    /// Fills `memory` with the chunk whose minimum block is `origin`, plus the
    /// halo of neighboring blocks around it.
    fn fetch_block_memory(&self, memory: &mut BlockMemory, origin: BlockPosition) -> FillState;

    /// True when the chunk holds only air or is not loaded.
    fn chunk_is_empty(&self, position: ChunkPosition) -> bool;
}

/// A sparse, thread-safe, in-memory world.
pub struct MemoryWorld {
    chunks: RwLock<HashMap<ChunkPosition, RefCounted<ChunkBlocks>>>,
    loading: RwLock<HashSet<ChunkPosition>>,
    events: ChunkEventSender,
    disposed_chunks: Arc<AtomicUsize>,
}

impl MemoryWorld {
    /// Creates an empty world that reports changes through `events`.
    pub fn new(events: ChunkEventSender) -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            loading: RwLock::new(HashSet::new()),
            events,
            disposed_chunks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn counted(&self, blocks: ChunkBlocks) -> RefCounted<ChunkBlocks> {
        let disposed = self.disposed_chunks.clone();
        RefCounted::with_disposer(blocks, move |_| {
            disposed.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Inserts or replaces a chunk and notifies listeners.
    ///
    /// Neighbors are notified too, since their border faces may change.
    pub fn insert_chunk(&self, position: ChunkPosition, blocks: ChunkBlocks) {
        let cell = self.counted(blocks);
        let previous = self
            .chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(position, cell);
        self.loading
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&position);

        match previous {
            Some(old) => {
                release_owner(&old);
                self.events.send(ChunkEvent::Updated(position));
            }
            None => self.events.send(ChunkEvent::Added(position)),
        }
        self.notify_neighbors(position);
    }

    /// Unloads a chunk and notifies listeners.
    ///
    /// # Returns
    /// `false` when the chunk was not loaded
    pub fn remove_chunk(&self, position: ChunkPosition) -> bool {
        let removed = self
            .chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&position);
        match removed {
            Some(old) => {
                release_owner(&old);
                self.events.send(ChunkEvent::Removed(position));
                self.notify_neighbors(position);
                true
            }
            None => false,
        }
    }

    /// Changes one block, creating the chunk if needed.
    ///
    /// Chunks whose halo contains the block are notified as updated as well.
    pub fn set_block(&self, position: BlockPosition, id: BlockId) {
        let chunk_position = position.chunk();
        let local = position.local();

        let previous = {
            let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
            let mut blocks = chunks
                .get(&chunk_position)
                .and_then(|cell| cell.try_get().map(|blocks| (*blocks).clone()))
                .unwrap_or_else(ChunkBlocks::empty);
            if blocks.get(local.x, local.y, local.z) == id {
                return;
            }
            blocks.set(local.x, local.y, local.z, id);
            let cell = self.counted(blocks);
            chunks.insert(chunk_position, cell)
        };
        match previous {
            Some(old) => {
                release_owner(&old);
                self.events.send(ChunkEvent::Updated(chunk_position));
            }
            None => self.events.send(ChunkEvent::Added(chunk_position)),
        }

        let edge = CHUNK_DIMENSION as usize - 1;
        let axes = [
            (local.x, Vector3::new(1, 0, 0)),
            (local.y, Vector3::new(0, 1, 0)),
            (local.z, Vector3::new(0, 0, 1)),
        ];
        for (coordinate, axis) in axes {
            if coordinate == 0 {
                self.notify_if_loaded(ChunkPosition(chunk_position.0 - axis));
            } else if coordinate == edge {
                self.notify_if_loaded(ChunkPosition(chunk_position.0 + axis));
            }
        }
    }

    /// Marks a chunk as being generated; fetches touching it report [`FillState::Partial`].
    pub fn mark_loading(&self, position: ChunkPosition) {
        self.loading
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(position);
    }

    /// Fills every chunk in the inclusive box with Perlin terrain.
    pub fn generate_perlin(&self, min: ChunkPosition, max: ChunkPosition, seed: u32, max_id: BlockId) {
        for y in min.0.y..=max.0.y {
            for z in min.0.z..=max.0.z {
                for x in min.0.x..=max.0.x {
                    let position = ChunkPosition::new(x, y, z);
                    self.insert_chunk(position, ChunkBlocks::perlin(position, seed, max_id));
                }
            }
        }
    }

    /// A copy of a chunk's blocks.
    pub fn chunk_snapshot(&self, position: ChunkPosition) -> Option<ChunkBlocks> {
        let handle = self.track_chunk(position)?;
        let blocks = handle.try_get().map(|blocks| (*blocks).clone());
        blocks
    }

    /// Number of loaded chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Chunk cells destroyed so far, after every reader released them.
    pub fn disposed_chunks(&self) -> usize {
        self.disposed_chunks.load(Ordering::Relaxed)
    }

    fn track_chunk(&self, position: ChunkPosition) -> Option<TrackedHandle<ChunkBlocks>> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&position)
            .and_then(|cell| cell.track().ok())
    }

    fn notify_neighbors(&self, position: ChunkPosition) {
        for neighbor in position.neighbors() {
            self.notify_if_loaded(neighbor);
        }
    }

    fn notify_if_loaded(&self, position: ChunkPosition) {
        let loaded = self
            .chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&position);
        if loaded {
            self.events.send(ChunkEvent::Updated(position));
        }
    }
}

fn release_owner(cell: &RefCounted<ChunkBlocks>) {
    if let Err(error) = cell.decrement() {
        log::error!("World chunk released twice: {error}");
    }
}

impl BlockSource for MemoryWorld {
    fn fetch_block_memory(&self, memory: &mut BlockMemory, origin: BlockPosition) -> FillState {
        let halo = memory.halo() as i32;
        let dimension = memory.dimension();
        let min = origin.0 - Vector3::new(halo, halo, halo);
        let extent = dimension as i32 - 1;
        let min_chunk = BlockPosition(min).chunk().0;
        let max_chunk = BlockPosition(min + Vector3::new(extent, extent, extent))
            .chunk()
            .0;

        let mut sources: HashMap<ChunkPosition, TrackedHandle<ChunkBlocks>> = HashMap::new();
        {
            let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
            let loading = self.loading.read().unwrap_or_else(PoisonError::into_inner);
            if !chunks.contains_key(&origin.chunk()) {
                return FillState::Partial;
            }
            for y in min_chunk.y..=max_chunk.y {
                for z in min_chunk.z..=max_chunk.z {
                    for x in min_chunk.x..=max_chunk.x {
                        let position = ChunkPosition::new(x, y, z);
                        if loading.contains(&position) {
                            return FillState::Partial;
                        }
                        if let Some(handle) = chunks.get(&position).and_then(|c| c.track().ok()) {
                            sources.insert(position, handle);
                        }
                    }
                }
            }
        }

        let views: HashMap<_, _> = sources
            .iter()
            .filter_map(|(position, handle)| handle.try_get().map(|view| (*position, view)))
            .collect();

        for y in 0..dimension {
            for z in 0..dimension {
                for x in 0..dimension {
                    let block = BlockPosition(min + Vector3::new(x as i32, y as i32, z as i32));
                    let id = match views.get(&block.chunk()) {
                        Some(view) => {
                            let local = block.local();
                            view.get(local.x, local.y, local.z)
                        }
                        None => AIR,
                    };
                    memory.set(x, y, z, id);
                }
            }
        }

        FillState::Filled
    }

    fn chunk_is_empty(&self, position: ChunkPosition) -> bool {
        self.track_chunk(position)
            .and_then(|handle| handle.try_get().map(|blocks| blocks.is_empty()))
            .unwrap_or(true)
    }
}

#[cfg(test)]
#[path = "world_test.rs"]
mod world_test;
