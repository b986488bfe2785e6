use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use voxel_streaming::engine_state::gpu::{HostBackend, HostRenderPass};
use voxel_streaming::engine_state::memory::PooledAllocator;
use voxel_streaming::engine_state::rendering::meshing::VoxelMesher;
use voxel_streaming::engine_state::rendering::vertex::{ChunkVertex, CHUNK_VERTEX_STRIDE, INDEX_STRIDE};
use voxel_streaming::engine_state::voxels::block::BlockVisualTable;
use voxel_streaming::engine_state::voxels::chunk::{BlockMemory, ChunkBlocks};
use voxel_streaming::engine_state::voxels::events::chunk_event_channel;
use voxel_streaming::engine_state::voxels::position::{BlockPosition, ChunkPosition};
use voxel_streaming::engine_state::voxels::world::{BlockSource, FillState, MemoryWorld};
use voxel_streaming::{StreamingConfig, StreamingEngine};

const BLOCK_TYPES: u16 = 3;
const FRAME_BUDGET: Duration = Duration::from_millis(50);

type Drawn = HashMap<[i32; 3], Vec<ChunkVertex>>;

struct Pipeline {
    world: Arc<MemoryWorld>,
    engine: StreamingEngine<HostBackend>,
    loaded: HashSet<ChunkPosition>,
    table: Arc<BlockVisualTable>,
    player: ChunkPosition,
}

impl Pipeline {
    fn new(config: StreamingConfig) -> Self {
        let (events, receiver) = chunk_event_channel();
        let world = Arc::new(MemoryWorld::new(events));
        let table = Arc::new(BlockVisualTable::with_opaque_blocks(BLOCK_TYPES));
        let engine = StreamingEngine::new(
            config,
            HostBackend::new(2),
            receiver,
            table.clone(),
            world.clone(),
        )
        .unwrap();
        Self {
            world,
            engine,
            loaded: HashSet::new(),
            table,
            player: ChunkPosition::new(0, 0, 0),
        }
    }

    fn insert(&mut self, position: ChunkPosition, blocks: ChunkBlocks) {
        self.world.insert_chunk(position, blocks);
        self.loaded.insert(position);
    }

    fn remove(&mut self, position: ChunkPosition) {
        self.world.remove_chunk(position);
        self.loaded.remove(&position);
    }

    fn set_block(&mut self, position: BlockPosition, id: u16) {
        self.world.set_block(position, id);
        self.loaded.insert(position.chunk());
    }

    /// Runs frames until nothing is pending; returns how many it took.
    fn settle(&mut self) -> usize {
        for frame in 1..=2000 {
            self.engine
                .update(self.world.as_ref(), self.player, FRAME_BUDGET);
            if !self.engine.has_pending_work() {
                return frame;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("pipeline did not settle");
    }

    fn drawn(&self) -> Drawn {
        let mut pass = HostRenderPass::new();
        let draws = self.engine.render(&mut pass);
        let resolved = pass.resolve();
        assert_eq!(resolved.len(), draws as usize);

        let mut drawn = Drawn::new();
        for draw in resolved {
            let [x, y, z, _] = draw.render_info.translation;
            let previous = drawn.insert([x as i32, y as i32, z as i32], draw.vertices);
            assert!(previous.is_none(), "chunk at {:?} drawn twice", [x, y, z]);
        }
        drawn
    }

    fn expected(&self) -> Drawn {
        let mesher = VoxelMesher::new(self.table.clone(), Arc::new(PooledAllocator::default()));
        let mut memory = BlockMemory::new(2);
        let mut expected = Drawn::new();
        for &chunk in &self.loaded {
            let origin = chunk.origin_block();
            assert_eq!(
                self.world.fetch_block_memory(&mut memory, origin),
                FillState::Filled
            );
            let mesh = mesher.mesh(&memory).unwrap();
            if mesh.is_empty() {
                continue;
            }
            let mut interleaved = vec![0u8; mesh.vertex_upload_size() as usize];
            mesh.write_interleaved_vertices(&mut interleaved);
            let vertices: Vec<ChunkVertex> = interleaved
                .chunks_exact(CHUNK_VERTEX_STRIDE as usize)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            let drawn = mesh
                .index_bytes()
                .chunks_exact(INDEX_STRIDE as usize)
                .map(|bytes| vertices[bytemuck::pod_read_unaligned::<u32>(bytes) as usize])
                .collect();
            expected.insert([origin.0.x, origin.0.y, origin.0.z], drawn);
        }
        expected
    }

    fn assert_converged(&mut self) {
        self.settle();
        let drawn = self.drawn();
        let expected = self.expected();
        assert_eq!(drawn.len(), expected.len());
        for (origin, vertices) in &expected {
            match drawn.get(origin) {
                Some(actual) => assert!(actual == vertices, "chunk at {origin:?} differs"),
                None => panic!("chunk at {origin:?} not drawn"),
            }
        }
    }
}

fn chunk_box(min: [i32; 3], max: [i32; 3]) -> Vec<ChunkPosition> {
    let mut chunks = Vec::new();
    for y in min[1]..=max[1] {
        for z in min[2]..=max[2] {
            for x in min[0]..=max[0] {
                chunks.push(ChunkPosition::new(x, y, z));
            }
        }
    }
    chunks
}

fn sparse_chunk(rng: &mut fastrand::Rng, blocks: usize) -> ChunkBlocks {
    let mut chunk = ChunkBlocks::empty();
    for _ in 0..blocks {
        chunk.set(
            rng.usize(0..16),
            rng.usize(0..16),
            rng.usize(0..16),
            rng.u16(1..=BLOCK_TYPES),
        );
    }
    chunk
}

#[test]
fn test_perlin_world_streams_edits_and_survives_device_loss() {
    let config = StreamingConfig {
        region_size: [2, 2, 2],
        worker_threads: 2,
        ..StreamingConfig::default()
    };
    let mut pipeline = Pipeline::new(config);
    for chunk in chunk_box([-2, -1, -2], [1, 1, 1]) {
        pipeline.insert(chunk, ChunkBlocks::perlin(chunk, 7, BLOCK_TYPES));
    }
    pipeline.assert_converged();
    assert!(pipeline.engine.stats().regions > 0);

    let mut rng = fastrand::Rng::with_seed(99);
    for _ in 0..200 {
        let block = BlockPosition::new(rng.i32(-32..32), rng.i32(-16..32), rng.i32(-32..32));
        pipeline.set_block(block, rng.u16(0..=BLOCK_TYPES));
    }
    for chunk in chunk_box([-2, 1, -2], [-1, 1, 1]) {
        pipeline.remove(chunk);
    }
    pipeline.assert_converged();

    pipeline.engine.on_device_lost(HostBackend::new(1));
    assert_eq!(pipeline.engine.arenas().bytes_used(), 0);
    assert!(pipeline.drawn().is_empty());
    pipeline.assert_converged();

    assert!(pipeline.engine.shutdown(Duration::from_secs(5)));
    assert_eq!(pipeline.engine.stats().in_flight_submissions, 0);
}

#[test]
fn test_tight_budget_and_tiny_arenas_still_converge() {
    let config = StreamingConfig {
        region_size: [2, 2, 2],
        staging_budget_bytes: 16 * 1024,
        initial_arena_bytes: 4096,
        arena_granularity_bytes: 4096,
        ..StreamingConfig::default()
    };
    let mut pipeline = Pipeline::new(config);
    let mut rng = fastrand::Rng::with_seed(5);
    for chunk in chunk_box([0, 0, 0], [3, 2, 3]) {
        let blocks = sparse_chunk(&mut rng, 20);
        pipeline.insert(chunk, blocks);
    }

    let frames = pipeline.settle();
    assert!(frames > 1, "a 16 KiB budget cannot upload the world in one frame");
    assert!(pipeline.engine.arenas().byte_capacity() > 4 * 4096);
    pipeline.assert_converged();

    for _ in 0..5 {
        for _ in 0..30 {
            let block = BlockPosition::new(rng.i32(0..64), rng.i32(0..48), rng.i32(0..64));
            pipeline.set_block(block, rng.u16(0..=BLOCK_TYPES));
        }
        let victim = ChunkPosition::new(rng.i32(0..4), rng.i32(0..3), rng.i32(0..4));
        pipeline.remove(victim);
        pipeline.assert_converged();
    }

    for chunk in chunk_box([0, 0, 0], [3, 2, 3]) {
        pipeline.remove(chunk);
    }
    pipeline.assert_converged();
    assert!(pipeline.drawn().is_empty());
    assert!(pipeline.engine.shutdown(Duration::from_secs(5)));
    assert_eq!(pipeline.engine.arenas().bytes_used(), 0);
}
