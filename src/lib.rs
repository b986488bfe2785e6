#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Streaming
//!
//! Chunk meshing and incremental GPU streaming for voxel worlds.
//!
//! Blocks live in 16³ chunks owned by a world behind the [`BlockSource`] seam.
//! Chunks are grouped into regions; every region keeps a CPU cache of chunk
//! meshes and a GPU mirror that uploads only what changed, within a per-frame
//! byte budget, into four shared arena buffers.
//!
//! ## Key Modules
//!
//! * `config` - Every tunable, loadable from JSON
//! * `core` - Shared handles with explicit ownership
//! * `engine_state` - The pipeline: voxels, meshing, regions, workers and the GPU side
//!
//! ## Usage
//!
//! ```no_run
//! fn main() {
//!     voxel_streaming::run();
//! }
//! ```
//!
//! ## Performance Considerations
//!
//! * Mesh buffers come from a size-classed pool and go back to it
//! * Remeshing is bounded by wall-clock time, uploads by bytes
//! * Regions draw with one indirect multi-draw each, against buffers bound once
//!
//! [`BlockSource`]: engine_state::voxels::world::BlockSource

use std::sync::Arc;

use log::info;

pub mod config;
pub mod core;
pub mod engine_state;

pub use config::{ConfigError, StreamingConfig};
pub use engine_state::{EngineStats, StreamingEngine};

use engine_state::gpu::{HostBackend, HostRenderPass};
use engine_state::voxels::block::BlockVisualTable;
use engine_state::voxels::events::chunk_event_channel;
use engine_state::voxels::position::{BlockPosition, ChunkPosition};
use engine_state::voxels::world::MemoryWorld;

/// Frames the demo streams.
const DEMO_FRAMES: u32 = 240;
/// Frames between player steps.
const FRAMES_PER_STEP: u32 = 20;
/// Loaded chunks around the player along X and Z.
const VIEW_RADIUS: i32 = 4;
/// Highest block id the demo terrain uses.
const DEMO_BLOCK_TYPES: u16 = 4;

/// Streams a Perlin world through the engine on the in-memory backend while the
/// player walks along +X, logging what happens.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();
    info!("Logger initialized");

    let config = StreamingConfig {
        worker_threads: std::thread::available_parallelism()
            .map(|threads| threads.get().saturating_sub(1).min(4))
            .unwrap_or(0),
        ..StreamingConfig::default()
    };

    let (events, receiver) = chunk_event_channel();
    let world = Arc::new(MemoryWorld::new(events));
    let seed = fastrand::u32(..);
    let mut rng = fastrand::Rng::with_seed(seed as u64);
    let mut player = ChunkPosition::new(0, 0, 0);
    world.generate_perlin(
        ChunkPosition::new(-VIEW_RADIUS, -1, -VIEW_RADIUS),
        ChunkPosition::new(VIEW_RADIUS, 1, VIEW_RADIUS),
        seed,
        DEMO_BLOCK_TYPES,
    );
    info!("Generated {} chunks with seed {}", world.chunk_count(), seed);

    let table = Arc::new(BlockVisualTable::with_opaque_blocks(DEMO_BLOCK_TYPES));
    let mut engine = match StreamingEngine::new(
        config.clone(),
        HostBackend::new(2),
        receiver,
        table,
        world.clone(),
    ) {
        Ok(engine) => engine,
        Err(error) => {
            log::error!("Invalid streaming config: {error}");
            return;
        }
    };

    for frame in 0..DEMO_FRAMES {
        if frame > 0 && frame % FRAMES_PER_STEP == 0 {
            player = ChunkPosition::new(player.0.x + 1, 0, 0);
            let leading = player.0.x + VIEW_RADIUS;
            let trailing = player.0.x - VIEW_RADIUS - 1;
            world.generate_perlin(
                ChunkPosition::new(leading, -1, -VIEW_RADIUS),
                ChunkPosition::new(leading, 1, VIEW_RADIUS),
                seed,
                DEMO_BLOCK_TYPES,
            );
            for y in -1..=1 {
                for z in -VIEW_RADIUS..=VIEW_RADIUS {
                    world.remove_chunk(ChunkPosition::new(trailing, y, z));
                }
            }
        }

        let origin = player.origin_block().0;
        let edit = BlockPosition::new(
            origin.x + rng.i32(-16..32),
            rng.i32(-16..32),
            rng.i32(-64..64),
        );
        world.set_block(edit, rng.u16(0..=DEMO_BLOCK_TYPES));

        let events = engine.update(world.as_ref(), player, config.frame_budget());
        if !events.is_empty() {
            log::debug!("Frame {frame}: {} region events", events.len());
        }

        let mut pass = HostRenderPass::new();
        let drawn = engine.render(&mut pass);

        if frame % FRAMES_PER_STEP == FRAMES_PER_STEP - 1 {
            let stats = engine.stats();
            info!(
                "Frame {}: player {:?}, {} regions, {} chunks drawn, {} of {} arena bytes used, {} submissions in flight",
                frame,
                player.0,
                stats.regions,
                drawn,
                stats.arena_bytes_used,
                stats.arena_byte_capacity,
                stats.in_flight_submissions
            );
            info!(
                "Mesh pool: {} pooled, {} heap, {} blocks retained",
                stats.pool.pooled_allocations,
                stats.pool.heap_allocations,
                stats.pool.retained_blocks
            );
        }
    }

    let clean = engine.shutdown(config.shutdown_timeout());
    info!(
        "Demo finished ({}), {} chunk cells disposed",
        if clean { "clean shutdown" } else { "shutdown timed out" },
        world.disposed_chunks()
    );
}
