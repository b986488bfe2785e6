//! # Region Update Scheduler
//!
//! Turns the world's chunk event stream into remeshing work and spends a bounded
//! slice of each frame on it.
//!
//! ## Event Intake
//!
//! Events are drained from the channel into three pending sets. Within one drain
//! they cancel out the way the final world state requires:
//!
//! * a removal drops a pending add and a pending update of the same chunk
//! * an add drops a pending removal
//! * an update of a chunk pending removal is ignored
//!
//! ## Tick
//!
//! Removals apply first, so a region emptied and refilled in one frame is
//! evicted and recreated rather than left half stale. Additions follow, then
//! updates. Finally dirty regions are remeshed nearest first, measured from the
//! player's chunk to each region's center, until the time budget runs out. The
//! first region is always processed so progress is guaranteed even when a
//! single region exceeds the budget.
//!
//! The tick never waits on a region lock. A chunk change aimed at a region a
//! worker is remeshing stays in its pending set until a later tick, and the
//! dirty filter reads each region's shared counter instead of the region.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use web_time::Instant;

use crate::config::StreamingConfig;
use crate::core::MtResource;
use crate::engine_state::rendering::meshing::VoxelMesher;
use crate::engine_state::task_management::{MeshingWorkerPool, RegionMeshStatus};
use crate::engine_state::voxels::chunk::BlockMemory;
use crate::engine_state::voxels::events::ChunkEvent;
use crate::engine_state::voxels::position::{ChunkPosition, RegionPosition};
use crate::engine_state::voxels::world::BlockSource;

use super::{LogicalRegion, RegionEvent, RegionHandle};

/// Owns every logical region and decides when each one remeshes.
pub struct RegionUpdateScheduler {
    region_size: [u32; 3],
    events: Receiver<ChunkEvent>,
    regions: HashMap<RegionPosition, RegionHandle>,
    dirty: HashMap<RegionPosition, Arc<AtomicU32>>,
    to_add: HashSet<ChunkPosition>,
    to_update: HashSet<ChunkPosition>,
    to_remove: HashSet<ChunkPosition>,
    pending: bool,
    scratch: BlockMemory,
    mesher: VoxelMesher,
    workers: Option<MeshingWorkerPool>,
}

impl RegionUpdateScheduler {
    /// Creates a scheduler that meshes inline on the calling thread.
    pub fn new(config: &StreamingConfig, events: Receiver<ChunkEvent>, mesher: VoxelMesher) -> Self {
        Self {
            region_size: config.region_size,
            events,
            regions: HashMap::new(),
            dirty: HashMap::new(),
            to_add: HashSet::new(),
            to_update: HashSet::new(),
            to_remove: HashSet::new(),
            pending: false,
            scratch: BlockMemory::new(config.halo as usize),
            mesher,
            workers: None,
        }
    }

    /// Hands remeshing to `workers` instead of doing it inline.
    pub fn with_workers(mut self, workers: MeshingWorkerPool) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Moves queued chunk events into the pending sets.
    ///
    /// # Returns
    /// The number of events drained
    pub fn drain_events(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.events.try_recv() {
            drained += 1;
            match event {
                ChunkEvent::Added(position) => {
                    self.to_remove.remove(&position);
                    self.to_add.insert(position);
                }
                ChunkEvent::Updated(position) => {
                    if !self.to_remove.contains(&position) {
                        self.to_update.insert(position);
                    }
                }
                ChunkEvent::Removed(position) => {
                    self.to_add.remove(&position);
                    self.to_update.remove(&position);
                    self.to_remove.insert(position);
                }
            }
        }
        drained
    }

    /// Applies pending chunk changes and remeshes dirty regions within `budget`.
    ///
    /// # Arguments
    /// * `world` - Source of emptiness checks and block neighborhoods
    /// * `player_chunk` - Regions nearer to this chunk are remeshed first
    /// * `budget` - Wall-clock time for remeshing; at least one region runs regardless
    ///
    /// # Returns
    /// Region lifecycle events in the order they happened
    pub fn tick(
        &mut self,
        world: &dyn BlockSource,
        player_chunk: ChunkPosition,
        budget: Duration,
    ) -> Vec<RegionEvent> {
        let start = Instant::now();
        let mut events = Vec::new();

        self.drain_events();
        self.collect_worker_results(&mut events);
        self.apply_removals(&mut events);
        self.apply_additions(world, &mut events);
        self.apply_updates(world);

        if self.pending {
            self.update_regions(world, player_chunk, start, budget, &mut events);
        }
        events
    }

    fn apply_removals(&mut self, events: &mut Vec<RegionEvent>) {
        let mut busy = HashSet::new();
        for chunk in std::mem::take(&mut self.to_remove) {
            let position = chunk.region(self.region_size);
            let Some(handle) = self.regions.get(&position) else {
                continue;
            };
            let Some(mut region) = handle.try_get_mut() else {
                busy.insert(chunk);
                continue;
            };
            region.remove_chunk(chunk);
            let vacant = region.is_vacant();
            drop(region);

            self.pending = true;
            if vacant {
                self.regions.remove(&position);
                self.dirty.remove(&position);
                log::debug!("Region {:?} evicted", position.0);
                events.push(RegionEvent::Removed(position));
            }
        }
        self.to_remove = busy;
    }

    fn apply_additions(&mut self, world: &dyn BlockSource, events: &mut Vec<RegionEvent>) {
        let mut busy = HashSet::new();
        let region_size = self.region_size;
        let dirty = &mut self.dirty;
        for chunk in std::mem::take(&mut self.to_add) {
            let position = chunk.region(region_size);
            let handle = self.regions.entry(position).or_insert_with(|| {
                log::debug!("Region {:?} created", position.0);
                events.push(RegionEvent::Added(position));
                let region = LogicalRegion::new(position, region_size);
                dirty.insert(position, region.dirty_counter());
                MtResource::new(region)
            });
            match handle.try_get_mut() {
                Some(mut region) => {
                    region.add_chunk(chunk, world.chunk_is_empty(chunk));
                    self.pending = true;
                }
                None => {
                    busy.insert(chunk);
                }
            }
        }
        self.to_add = busy;
    }

    fn apply_updates(&mut self, world: &dyn BlockSource) {
        let mut busy = HashSet::new();
        for chunk in std::mem::take(&mut self.to_update) {
            let position = chunk.region(self.region_size);
            let Some(handle) = self.regions.get(&position) else {
                continue;
            };
            match handle.try_get_mut() {
                Some(mut region) => {
                    region.update_chunk(chunk, world.chunk_is_empty(chunk));
                    self.pending = true;
                }
                None => {
                    busy.insert(chunk);
                }
            }
        }
        self.to_update = busy;
    }

    fn update_regions(
        &mut self,
        world: &dyn BlockSource,
        player_chunk: ChunkPosition,
        start: Instant,
        budget: Duration,
        events: &mut Vec<RegionEvent>,
    ) {
        let region_size = self.region_size;
        let mut order: Vec<(u64, RegionPosition)> = self
            .dirty
            .iter()
            .filter(|(_, counter)| counter.load(Ordering::Acquire) > 0)
            .map(|(position, _)| {
                (
                    position.doubled_center_distance(player_chunk, region_size),
                    *position,
                )
            })
            .collect();
        order.sort_unstable_by_key(|&(distance, position)| {
            (distance, position.0.x, position.0.y, position.0.z)
        });

        let mut finished = true;
        let mut still_dirty = false;
        for (processed, (_, position)) in order.into_iter().enumerate() {
            if processed > 0 && start.elapsed() >= budget {
                finished = false;
                break;
            }
            let Some(handle) = self.regions.get(&position) else {
                continue;
            };

            match &mut self.workers {
                Some(workers) => {
                    // Refused while an earlier task for the region is still out;
                    // its outcome may predate this change.
                    if !workers.publish_task(position, handle.clone()) {
                        still_dirty = true;
                    }
                }
                None => {
                    let Some(mut region) = handle.try_get_mut() else {
                        still_dirty = true;
                        continue;
                    };
                    if region.update(world, &mut self.scratch, &self.mesher) {
                        events.push(RegionEvent::Updated(position));
                    }
                    still_dirty |= region.is_dirty();
                }
            }
        }

        if finished {
            self.pending = still_dirty;
        }
    }

    fn collect_worker_results(&mut self, events: &mut Vec<RegionEvent>) {
        let Some(workers) = &mut self.workers else {
            return;
        };
        for outcome in workers.process_completed_tasks() {
            if !self.regions.contains_key(&outcome.position) {
                continue;
            }
            if outcome.status == RegionMeshStatus::Updated {
                events.push(RegionEvent::Updated(outcome.position));
            }
            if outcome.still_dirty || self.region_is_dirty(outcome.position) {
                self.pending = true;
            }
        }
    }

    /// True when some slot of the region at `position` waits for an update.
    /// Never takes the region lock.
    pub fn region_is_dirty(&self, position: RegionPosition) -> bool {
        self.dirty
            .get(&position)
            .is_some_and(|counter| counter.load(Ordering::Acquire) > 0)
    }

    /// Re-dirties every region; used when the GPU copies were lost.
    ///
    /// Waits for regions a worker is remeshing.
    pub fn invalidate_all(&mut self) {
        for handle in self.regions.values() {
            handle.get_mut().invalidate_all();
        }
        self.pending = true;
    }

    /// Every live region.
    pub fn regions(&self) -> &HashMap<RegionPosition, RegionHandle> {
        &self.regions
    }

    /// The region at `position`, if live.
    pub fn region(&self, position: RegionPosition) -> Option<&RegionHandle> {
        self.regions.get(&position)
    }

    /// True while some region may still need remeshing.
    pub fn has_pending_work(&self) -> bool {
        self.pending
            || !self.to_add.is_empty()
            || !self.to_update.is_empty()
            || !self.to_remove.is_empty()
            || self
                .workers
                .as_ref()
                .is_some_and(|workers| workers.tasks_in_flight() > 0)
    }

    /// Pending chunk additions, updates and removals.
    pub fn pending_chunk_counts(&self) -> (usize, usize, usize) {
        (self.to_add.len(), self.to_update.len(), self.to_remove.len())
    }

    /// The mesher used for inline remeshing.
    pub fn mesher(&self) -> &VoxelMesher {
        &self.mesher
    }

    /// Stops the worker pool, if any.
    ///
    /// # Returns
    /// False when workers did not stop within `timeout`
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        match self.workers.take() {
            Some(mut workers) => workers.shutdown(timeout),
            None => true,
        }
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;
