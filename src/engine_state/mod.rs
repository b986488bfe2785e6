//! # Engine State Module
//!
//! The streaming engine ties the pipeline together: world changes go in, GPU
//! draw calls come out.
//!
//! ## Key Components
//!
//! * `voxels` - Block data, coordinates and the world seam
//! * `memory` - Pooled CPU buffers for meshes
//! * `rendering` - The mesher and the GPU record formats
//! * `regions` - Logical and visual regions and the update scheduler
//! * `task_management` - Background meshing workers
//! * `gpu` - Backends, arenas and fence-gated submissions
//!
//! ## Frame Flow
//!
//! [`StreamingEngine::update`] runs once per frame:
//!
//! 1. Poll the device and reclaim every submission whose fence has signaled.
//! 2. Tick the scheduler, which applies chunk events and remeshes regions
//!    within the frame budget.
//! 3. Create and destroy visual regions to match the region events.
//! 4. Encode every region whose GPU copy is behind, nearest to the player
//!    first, until the staging budget is spent.
//! 5. Submit the copies together with everything they superseded.
//!
//! [`StreamingEngine::render`] then binds the shared arenas once and issues one
//! multi-draw per region.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, StreamingConfig};

pub mod gpu;
pub mod memory;
pub mod regions;
pub mod rendering;
pub mod task_management;
pub mod voxels;

use gpu::{ArenaChannel, ArenaSet, GpuBackend, RenderRecorder, RetiredResources, SubmissionPool};
use memory::{PoolStats, PooledAllocator};
use regions::{EncodeContext, EncodeStatus, RegionEvent, RegionUpdateScheduler, VisualRegion};
use rendering::meshing::VoxelMesher;
use task_management::MeshingWorkerPool;
use voxels::block::BlockVisualTable;
use voxels::events::ChunkEvent;
use voxels::position::{ChunkPosition, RegionPosition};
use voxels::world::BlockSource;

/// Counters of the most recent frame, plus running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames updated so far.
    pub frames: u64,
    /// Live regions.
    pub regions: usize,
    /// Bytes staged by the last frame.
    pub staged_bytes: u64,
    /// Chunks uploaded by the last frame.
    pub uploaded_chunks: usize,
    /// Chunks cleared by the last frame.
    pub cleared_chunks: usize,
    /// Regions left behind by the last frame for lack of budget.
    pub deferred_regions: usize,
    /// Bytes allocated across the four arenas.
    pub arena_bytes_used: u64,
    /// Capacity across the four arenas.
    pub arena_byte_capacity: u64,
    /// Submissions awaiting their fence.
    pub in_flight_submissions: usize,
    /// Meshing pool counters.
    pub pool: PoolStats,
}

/// The incremental voxel streaming pipeline on one GPU backend.
pub struct StreamingEngine<B: GpuBackend> {
    config: StreamingConfig,
    backend: B,
    scheduler: RegionUpdateScheduler,
    visual_regions: HashMap<RegionPosition, VisualRegion>,
    arenas: ArenaSet<B>,
    submissions: SubmissionPool<B>,
    pool: Arc<PooledAllocator>,
    stats: EngineStats,
}

impl<B: GpuBackend> StreamingEngine<B> {
    /// Builds an engine.
    ///
    /// # Arguments
    /// * `config` - Validated here; the rest of the crate trusts it
    /// * `backend` - Device owning the arenas and staging buffers
    /// * `events` - Receiver of the world's chunk events
    /// * `table` - Visuals of every block id the world may contain
    /// * `world` - Shared with the meshing workers; unused when `worker_threads` is zero
    ///
    /// # Errors
    /// [`ConfigError`] when `config` is invalid
    pub fn new(
        config: StreamingConfig,
        backend: B,
        events: Receiver<ChunkEvent>,
        table: Arc<BlockVisualTable>,
        world: Arc<dyn BlockSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let pool = Arc::new(PooledAllocator::from_config(&config));
        let mesher = VoxelMesher::new(table, pool.clone());
        let mut scheduler = RegionUpdateScheduler::new(&config, events, mesher.clone());
        if config.worker_threads > 0 {
            scheduler = scheduler.with_workers(MeshingWorkerPool::new(
                config.worker_threads,
                world,
                mesher,
                config.halo as usize,
            ));
        }

        let arenas = ArenaSet::new(
            &backend,
            config.initial_arena_bytes,
            config.arena_granularity_bytes,
        );
        let submissions = SubmissionPool::new(config.staging_budget_bytes);

        log::info!(
            "Streaming engine ready: regions of {:?} chunks, {} byte arenas, {} meshing workers",
            config.region_size,
            config.initial_arena_bytes,
            config.worker_threads
        );

        Ok(Self {
            config,
            backend,
            scheduler,
            visual_regions: HashMap::new(),
            arenas,
            submissions,
            pool,
            stats: EngineStats::default(),
        })
    }

    /// Advances the pipeline by one frame.
    ///
    /// # Arguments
    /// * `world` - Block source for emptiness checks and inline meshing
    /// * `player_chunk` - Work nearer to this chunk goes first
    /// * `frame_budget` - Wall-clock time the scheduler may spend remeshing
    ///
    /// # Returns
    /// The region events of this frame
    pub fn update(
        &mut self,
        world: &dyn BlockSource,
        player_chunk: ChunkPosition,
        frame_budget: Duration,
    ) -> Vec<RegionEvent> {
        self.backend.poll();
        self.submissions.reclaim(&mut self.arenas);

        let events = self.scheduler.tick(world, player_chunk, frame_budget);

        let mut retired = RetiredResources::new();
        let chunk_count = self.config.chunks_per_region();
        for event in &events {
            match *event {
                RegionEvent::Added(position) => {
                    self.visual_regions
                        .entry(position)
                        .or_insert_with(|| VisualRegion::new(position, chunk_count));
                }
                RegionEvent::Removed(position) => {
                    if let Some(mut region) = self.visual_regions.remove(&position) {
                        region.destroy(&self.arenas, &mut retired);
                    }
                }
                RegionEvent::Updated(_) => {}
            }
        }

        self.upload(player_chunk, retired);
        self.stats.frames += 1;
        self.stats.regions = self.visual_regions.len();
        self.stats.arena_bytes_used = self.arenas.bytes_used();
        self.stats.arena_byte_capacity = self.arenas.byte_capacity();
        self.stats.in_flight_submissions = self.submissions.in_flight_count();
        self.stats.pool = self.pool.stats();
        events
    }

    fn upload(&mut self, player_chunk: ChunkPosition, mut retired: RetiredResources<B>) {
        let mut staging = self.submissions.acquire_staging(&self.backend);
        let mut recorder = self.backend.create_recorder("chunk upload");
        let mut budget = self.config.staging_budget_bytes.min(staging.remaining());

        let region_size = self.config.region_size;
        let mut order: Vec<_> = self.visual_regions.keys().copied().collect();
        order.sort_unstable_by_key(|position| {
            (
                position.doubled_center_distance(player_chunk, region_size),
                position.0.x,
                position.0.y,
                position.0.z,
            )
        });

        self.stats.uploaded_chunks = 0;
        self.stats.cleared_chunks = 0;
        self.stats.deferred_regions = 0;

        // A compaction during the first pass stales the tables of regions
        // encoded before it; the second pass rewrites them.
        for pass in 0..2 {
            let mut deferred = 0;
            for &position in &order {
                let Some(handle) = self.scheduler.region(position) else {
                    continue;
                };
                let Some(mut logical) = handle.try_get_mut() else {
                    continue;
                };
                let Some(mut visual) = self.visual_regions.remove(&position) else {
                    continue;
                };

                if visual.needs_encode(&logical, &self.arenas) {
                    let mut ctx = EncodeContext {
                        backend: &self.backend,
                        recorder: &mut recorder,
                        arenas: &mut self.arenas,
                        staging: &mut staging,
                        budget,
                        others: &mut self.visual_regions,
                    };
                    let result = visual.encode(&mut logical, &mut ctx);
                    budget -= result.staged_bytes;
                    self.stats.uploaded_chunks += result.uploaded_chunks;
                    self.stats.cleared_chunks += result.cleared_chunks;
                    if matches!(
                        result.status,
                        EncodeStatus::Incomplete | EncodeStatus::NotEnoughSpace
                    ) {
                        deferred += 1;
                    }
                    retired.append(result.retired);
                }
                self.visual_regions.insert(position, visual);
            }
            self.stats.deferred_regions = deferred;

            let stale = self
                .visual_regions
                .values()
                .any(|visual| visual.table_is_stale(&self.arenas));
            if !stale {
                break;
            }
            if pass == 1 {
                log::debug!("Draw tables left stale until next frame");
            }
        }

        self.stats.staged_bytes = staging.len();
        if staging.is_empty() && retired.is_empty() {
            self.submissions.recycle_staging(staging);
            return;
        }
        if self.stats.deferred_regions > 0 {
            log::debug!(
                "Staged {} bytes; {} regions wait for the next frame",
                staging.len(),
                self.stats.deferred_regions
            );
        }
        self.submissions
            .submit(&self.backend, recorder, Some(staging), retired);
    }

    /// Binds the shared arenas and issues one multi-draw per region.
    ///
    /// # Returns
    /// The number of chunks drawn
    pub fn render<R: RenderRecorder<B::Buffer>>(&self, pass: &mut R) -> u32 {
        pass.set_geometry_buffers(
            self.arenas.get(ArenaChannel::Index).buffer(),
            self.arenas.get(ArenaChannel::Vertex).buffer(),
            self.arenas.get(ArenaChannel::RenderInfo).buffer(),
        );
        let mut drawn = 0;
        for region in self.visual_regions.values() {
            if region.render(&self.arenas, pass) {
                drawn += region.draw_count();
            }
        }
        drawn
    }

    /// Moves the engine to a new device after the old one was lost.
    ///
    /// Every GPU resource is recreated empty and every logical region is
    /// marked dirty, so the next frames remesh and upload the world again.
    pub fn on_device_lost(&mut self, backend: B) {
        log::warn!(
            "Device lost; rebuilding {} regions on the new device",
            self.visual_regions.len()
        );
        self.submissions.abandon();
        self.backend = backend;
        self.arenas = ArenaSet::new(
            &self.backend,
            self.config.initial_arena_bytes,
            self.config.arena_granularity_bytes,
        );

        let chunk_count = self.config.chunks_per_region();
        self.visual_regions = self
            .scheduler
            .regions()
            .keys()
            .map(|&position| (position, VisualRegion::new(position, chunk_count)))
            .collect();
        self.scheduler.invalidate_all();
    }

    /// Stops the workers and waits for in-flight submissions.
    ///
    /// # Returns
    /// True when everything stopped within `timeout`
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let workers_stopped = self.scheduler.shutdown(timeout);
        let drained = self
            .submissions
            .drain(&self.backend, &mut self.arenas, timeout);
        if !drained {
            self.submissions.abandon();
        }
        log::info!(
            "Streaming engine shut down after {} frames (workers stopped: {}, submissions drained: {})",
            self.stats.frames,
            workers_stopped,
            drained
        );
        workers_stopped && drained
    }

    /// Counters of the last frame.
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// The device.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The region scheduler.
    pub fn scheduler(&self) -> &RegionUpdateScheduler {
        &self.scheduler
    }

    /// The shared arenas.
    pub fn arenas(&self) -> &ArenaSet<B> {
        &self.arenas
    }

    /// The visual region at `position`, if live.
    pub fn visual_region(&self, position: RegionPosition) -> Option<&VisualRegion> {
        self.visual_regions.get(&position)
    }

    /// True while chunk changes are still on their way to the GPU.
    pub fn has_pending_work(&self) -> bool {
        self.scheduler.has_pending_work()
            || self.scheduler.regions().iter().any(|(position, handle)| {
                let Some(visual) = self.visual_regions.get(position) else {
                    return false;
                };
                // A region locked by a worker is about to change anyway.
                handle
                    .try_get()
                    .map_or(true, |logical| visual.needs_encode(&logical, &self.arenas))
            })
    }
}
