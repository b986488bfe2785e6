use std::sync::Arc;

use super::*;
use crate::engine_state::gpu::{HostBackend, HostRenderPass, SubmissionPool};
use crate::engine_state::memory::PooledAllocator;
use crate::engine_state::rendering::meshing::VoxelMesher;
use crate::engine_state::rendering::vertex::ChunkVertex;
use crate::engine_state::voxels::block::BlockVisualTable;
use crate::engine_state::voxels::chunk::BlockMemory;
use crate::engine_state::voxels::events::chunk_event_channel;
use crate::engine_state::voxels::position::{BlockPosition, ChunkPosition};
use crate::engine_state::voxels::world::{BlockSource, FillState, MemoryWorld};

const SIZE: [u32; 3] = [2, 2, 2];
/// Index plus vertex bytes of a chunk holding one isolated block.
const CUBE_PAYLOAD: u64 = 36 * 4 + 24 * 16;

type Regions = HashMap<RegionPosition, VisualRegion>;

struct Encoded {
    status: EncodeStatus,
    staged_bytes: u64,
    uploaded_chunks: usize,
    cleared_chunks: usize,
    retired_buffers: usize,
}

struct Harness {
    backend: HostBackend,
    arenas: ArenaSet<HostBackend>,
    pool: SubmissionPool<HostBackend>,
    world: MemoryWorld,
    scratch: BlockMemory,
    mesher: VoxelMesher,
}

impl Harness {
    fn new(initial_arena: u64) -> Self {
        let backend = HostBackend::new(1);
        let arenas = ArenaSet::new(&backend, initial_arena, 256);
        let (events, _receiver) = chunk_event_channel();
        Self {
            backend,
            arenas,
            pool: SubmissionPool::new(1 << 16),
            world: MemoryWorld::new(events),
            scratch: BlockMemory::new(2),
            mesher: VoxelMesher::new(
                Arc::new(BlockVisualTable::with_opaque_blocks(2)),
                Arc::new(PooledAllocator::default()),
            ),
        }
    }

    fn add_cube_chunk(&self, logical: &mut LogicalRegion, chunk: ChunkPosition) {
        let origin = chunk.origin_block().0;
        self.world
            .set_block(BlockPosition::new(origin.x + 3, origin.y + 3, origin.z + 3), 1);
        logical.add_chunk(chunk, false);
    }

    fn remesh(&mut self, logical: &mut LogicalRegion) {
        logical.update(&self.world, &mut self.scratch, &self.mesher);
    }

    fn encode(
        &mut self,
        visual: &mut VisualRegion,
        logical: &mut LogicalRegion,
        budget: u64,
        others: &mut Regions,
    ) -> Encoded {
        let mut staging = self.pool.acquire_staging(&self.backend);
        let mut recorder = self.backend.create_recorder("visual region test");
        let result = {
            let mut ctx = EncodeContext {
                backend: &self.backend,
                recorder: &mut recorder,
                arenas: &mut self.arenas,
                staging: &mut staging,
                budget,
                others,
            };
            visual.encode(logical, &mut ctx)
        };
        let encoded = Encoded {
            status: result.status,
            staged_bytes: result.staged_bytes,
            uploaded_chunks: result.uploaded_chunks,
            cleared_chunks: result.cleared_chunks,
            retired_buffers: result.retired.buffer_count(),
        };
        assert_eq!(staging.len(), result.staged_bytes);

        self.pool
            .submit(&self.backend, recorder, Some(staging), result.retired);
        self.backend.poll();
        self.pool.reclaim(&mut self.arenas);
        encoded
    }

    /// What the GPU would draw for `visuals`, keyed by chunk origin.
    fn rendered(&self, visuals: &[&VisualRegion]) -> HashMap<[i32; 3], Vec<ChunkVertex>> {
        let mut pass = HostRenderPass::new();
        pass.set_geometry_buffers(
            self.arenas.get(ArenaChannel::Index).buffer(),
            self.arenas.get(ArenaChannel::Vertex).buffer(),
            self.arenas.get(ArenaChannel::RenderInfo).buffer(),
        );
        for visual in visuals {
            visual.render(&self.arenas, &mut pass);
        }
        pass.resolve()
            .into_iter()
            .map(|draw| {
                let [x, y, z, w] = draw.render_info.translation;
                assert_eq!(w, 1.0);
                assert_eq!(draw.args.instance_count, 1);
                ([x as i32, y as i32, z as i32], draw.vertices)
            })
            .collect()
    }

    /// The vertices a fresh mesh of `chunk` draws, in index order.
    fn expected(&self, chunk: ChunkPosition) -> Vec<ChunkVertex> {
        let mut memory = BlockMemory::new(2);
        assert_eq!(
            self.world.fetch_block_memory(&mut memory, chunk.origin_block()),
            FillState::Filled
        );
        let mesh = self.mesher.mesh(&memory).unwrap();
        let mut interleaved = vec![0u8; mesh.vertex_upload_size() as usize];
        mesh.write_interleaved_vertices(&mut interleaved);
        let vertices: Vec<ChunkVertex> = interleaved
            .chunks_exact(CHUNK_VERTEX_STRIDE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        mesh.index_bytes()
            .chunks_exact(INDEX_STRIDE as usize)
            .map(|bytes| vertices[bytemuck::pod_read_unaligned::<u32>(bytes) as usize])
            .collect()
    }

    fn assert_draws_match(&self, visuals: &[&VisualRegion], chunks: &[ChunkPosition]) {
        let rendered = self.rendered(visuals);
        assert_eq!(rendered.len(), chunks.len());
        for &chunk in chunks {
            let origin = chunk.origin_block().0;
            let drawn = rendered
                .get(&[origin.x, origin.y, origin.z])
                .unwrap_or_else(|| panic!("chunk {chunk:?} not drawn"));
            assert_eq!(drawn, &self.expected(chunk), "chunk {chunk:?}");
        }
    }
}

fn five_chunks() -> Vec<ChunkPosition> {
    vec![
        ChunkPosition::new(0, 0, 0),
        ChunkPosition::new(1, 0, 0),
        ChunkPosition::new(0, 0, 1),
        ChunkPosition::new(1, 0, 1),
        ChunkPosition::new(0, 1, 0),
    ]
}

fn region_of(h: &mut Harness, position: RegionPosition, chunks: &[ChunkPosition]) -> LogicalRegion {
    let mut logical = LogicalRegion::new(position, SIZE);
    for &chunk in chunks {
        h.add_cube_chunk(&mut logical, chunk);
    }
    h.remesh(&mut logical);
    logical
}

#[test]
fn test_budget_below_one_chunk_changes_nothing() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let mut logical = region_of(&mut h, origin, &five_chunks());
    let mut visual = VisualRegion::new(origin, logical.chunks().len());

    let encoded = h.encode(&mut visual, &mut logical, 100, &mut Regions::new());

    assert_eq!(encoded.status, EncodeStatus::NotEnoughSpace);
    assert_eq!(encoded.staged_bytes, 0);
    assert_eq!(h.arenas.bytes_used(), 0);
    assert_eq!(h.backend.stats().bytes_copied, 0);
    assert_eq!(visual.draw_count(), 0);
    assert!(visual.chunks().iter().all(|chunk| chunk.version == 0));
    assert_eq!(
        logical.chunks().iter().filter(|slot| slot.mesh.is_some()).count(),
        5
    );
    assert!(visual.needs_encode(&logical, &h.arenas));
}

#[test]
fn test_budget_splits_upload_across_calls() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let chunks = five_chunks();
    let mut logical = region_of(&mut h, origin, &chunks);
    let mut visual = VisualRegion::new(origin, logical.chunks().len());
    let per_chunk = CUBE_PAYLOAD + DRAW_RECORD_BYTES;
    let budget = 3 * per_chunk;

    let first = h.encode(&mut visual, &mut logical, budget, &mut Regions::new());
    assert_eq!(first.status, EncodeStatus::Incomplete);
    assert_eq!(first.uploaded_chunks, 3);
    assert_eq!(first.staged_bytes, budget);
    assert_eq!(visual.draw_count(), 3);
    assert_eq!(h.arenas.get(ArenaChannel::Index).bytes_used(), 3 * 144);
    assert_eq!(h.arenas.get(ArenaChannel::Vertex).bytes_used(), 3 * 384);
    assert_eq!(
        logical.chunks().iter().filter(|slot| slot.mesh.is_some()).count(),
        2
    );
    h.assert_draws_match(&[&visual], &chunks[..3]);

    let second = h.encode(&mut visual, &mut logical, budget, &mut Regions::new());
    assert_eq!(second.status, EncodeStatus::Success);
    assert_eq!(second.uploaded_chunks, 2);
    assert_eq!(second.staged_bytes, 3 * DRAW_RECORD_BYTES + 2 * per_chunk);
    assert_eq!(visual.draw_count(), 5);
    assert_eq!(
        h.arenas.get(ArenaChannel::Indirect).bytes_used(),
        5 * INDIRECT_STRIDE
    );
    assert_eq!(
        h.arenas.get(ArenaChannel::RenderInfo).bytes_used(),
        5 * RENDER_INFO_STRIDE
    );

    let third = h.encode(&mut visual, &mut logical, budget, &mut Regions::new());
    assert_eq!(third.status, EncodeStatus::NoChange);
    assert!(!visual.needs_encode(&logical, &h.arenas));
    for (visual_chunk, logical_chunk) in visual.chunks().iter().zip(logical.chunks()) {
        assert_eq!(visual_chunk.version, logical_chunk.version);
    }
    h.assert_draws_match(&[&visual], &chunks);
}

#[test]
fn test_chunk_over_budget_holds_back_later_slots() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let chunks = &five_chunks()[..3];
    let double = chunks[1].origin_block().0;
    h.world
        .set_block(BlockPosition::new(double.x + 10, double.y + 10, double.z + 10), 1);
    let mut logical = region_of(&mut h, origin, chunks);
    let mut visual = VisualRegion::new(origin, logical.chunks().len());

    // Room for slots 0 and 2, but slot 1 carries two cubes.
    let budget = 2 * (CUBE_PAYLOAD + DRAW_RECORD_BYTES);
    let first = h.encode(&mut visual, &mut logical, budget, &mut Regions::new());
    assert_eq!(first.status, EncodeStatus::Incomplete);
    assert_eq!(first.uploaded_chunks, 1);
    assert_eq!(first.staged_bytes, CUBE_PAYLOAD + DRAW_RECORD_BYTES);
    let versions: Vec<u16> = visual.chunks()[..3].iter().map(|chunk| chunk.version).collect();
    assert_eq!(versions, vec![1, 0, 0]);
    h.assert_draws_match(&[&visual], &chunks[..1]);

    let second = h.encode(&mut visual, &mut logical, u64::MAX, &mut Regions::new());
    assert_eq!(second.status, EncodeStatus::Success);
    assert_eq!(second.uploaded_chunks, 2);
    assert!(!visual.needs_encode(&logical, &h.arenas));
    h.assert_draws_match(&[&visual], chunks);
}

#[test]
fn test_budget_covering_only_resident_records_fails() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let chunks = five_chunks();
    let mut logical = region_of(&mut h, origin, &chunks);
    let mut visual = VisualRegion::new(origin, logical.chunks().len());
    h.encode(&mut visual, &mut logical, u64::MAX, &mut Regions::new());

    let edited = chunks[0].origin_block().0;
    h.world
        .set_block(BlockPosition::new(edited.x + 8, edited.y + 8, edited.z + 8), 1);
    logical.update_chunk(chunks[0], false);
    h.remesh(&mut logical);

    let encoded = h.encode(
        &mut visual,
        &mut logical,
        5 * DRAW_RECORD_BYTES - 1,
        &mut Regions::new(),
    );
    assert_eq!(encoded.status, EncodeStatus::NotEnoughSpace);
    assert_eq!(encoded.staged_bytes, 0);
    assert_eq!(visual.draw_count(), 5);
    assert_ne!(visual.chunks()[0].version, logical.chunks()[0].version);
    assert!(logical.chunks()[0].mesh.is_some());

    let encoded = h.encode(
        &mut visual,
        &mut logical,
        5 * DRAW_RECORD_BYTES + 2 * CUBE_PAYLOAD,
        &mut Regions::new(),
    );
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.uploaded_chunks, 1);
    h.assert_draws_match(&[&visual], &chunks);
}

#[test]
fn test_emptied_chunk_is_cleared() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let chunks = [ChunkPosition::new(0, 0, 0), ChunkPosition::new(1, 1, 1)];
    let mut logical = region_of(&mut h, origin, &chunks);
    let mut visual = VisualRegion::new(origin, logical.chunks().len());
    h.encode(&mut visual, &mut logical, u64::MAX, &mut Regions::new());
    assert_eq!(visual.draw_count(), 2);

    let cube = chunks[1].origin_block().0;
    h.world
        .set_block(BlockPosition::new(cube.x + 3, cube.y + 3, cube.z + 3), 0);
    logical.update_chunk(chunks[1], h.world.chunk_is_empty(chunks[1]));
    h.remesh(&mut logical);

    let encoded = h.encode(&mut visual, &mut logical, u64::MAX, &mut Regions::new());
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.cleared_chunks, 1);
    assert_eq!(encoded.uploaded_chunks, 0);
    assert_eq!(encoded.staged_bytes, DRAW_RECORD_BYTES);
    assert_eq!(visual.draw_count(), 1);
    assert_eq!(h.arenas.get(ArenaChannel::Index).bytes_used(), 144);
    assert_eq!(h.arenas.get(ArenaChannel::Indirect).bytes_used(), INDIRECT_STRIDE);
    h.assert_draws_match(&[&visual], &chunks[..1]);

    // Clearing the last chunk leaves no table at all.
    let cube = chunks[0].origin_block().0;
    h.world
        .set_block(BlockPosition::new(cube.x + 3, cube.y + 3, cube.z + 3), 0);
    logical.update_chunk(chunks[0], true);
    h.remesh(&mut logical);
    let encoded = h.encode(&mut visual, &mut logical, 0, &mut Regions::new());
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.staged_bytes, 0);
    assert_eq!(visual.draw_count(), 0);
    assert_eq!(h.arenas.bytes_used(), 0);
}

#[test]
fn test_compaction_moves_other_regions_and_stales_their_table() {
    let mut h = Harness::new(256);
    let left_position = RegionPosition::new(0, 0, 0);
    let right_position = RegionPosition::new(1, 0, 0);
    let left_chunks = [ChunkPosition::new(0, 0, 0)];
    let right_chunks = [
        ChunkPosition::new(2, 0, 0),
        ChunkPosition::new(3, 0, 0),
        ChunkPosition::new(2, 0, 1),
    ];
    let mut left_logical = region_of(&mut h, left_position, &left_chunks);
    let mut right_logical = region_of(&mut h, right_position, &right_chunks);
    let mut left = VisualRegion::new(left_position, left_logical.chunks().len());
    let mut right = VisualRegion::new(right_position, right_logical.chunks().len());

    let encoded = h.encode(&mut left, &mut left_logical, u64::MAX, &mut Regions::new());
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.retired_buffers, 1);
    assert!(!left.table_is_stale(&h.arenas));

    let mut others = Regions::new();
    others.insert(left_position, left);
    let encoded = h.encode(&mut right, &mut right_logical, u64::MAX, &mut others);
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.retired_buffers, 2);
    assert!(h.arenas.get(ArenaChannel::Vertex).generation() >= 2);

    let Some(mut left) = others.remove(&left_position) else {
        panic!("left region vanished");
    };
    assert!(left.table_is_stale(&h.arenas));
    assert!(left.needs_encode(&left_logical, &h.arenas));
    h.assert_draws_match(&[&left, &right], &right_chunks);

    others.insert(right_position, right);
    let encoded = h.encode(&mut left, &mut left_logical, u64::MAX, &mut others);
    assert_eq!(encoded.status, EncodeStatus::Success);
    assert_eq!(encoded.uploaded_chunks, 0);
    assert_eq!(encoded.staged_bytes, DRAW_RECORD_BYTES);
    assert!(!left.table_is_stale(&h.arenas));

    let Some(right) = others.remove(&right_position) else {
        panic!("right region vanished");
    };
    let all: Vec<_> = left_chunks.iter().chain(&right_chunks).copied().collect();
    h.assert_draws_match(&[&left, &right], &all);
}

#[test]
fn test_destroy_returns_every_byte() {
    let mut h = Harness::new(4096);
    let origin = RegionPosition::new(0, 0, 0);
    let chunks = five_chunks();
    let mut logical = region_of(&mut h, origin, &chunks);
    let mut visual = VisualRegion::new(origin, logical.chunks().len());
    h.encode(&mut visual, &mut logical, u64::MAX, &mut Regions::new());
    assert!(h.arenas.bytes_used() > 0);

    let mut retired = RetiredResources::new();
    visual.destroy(&h.arenas, &mut retired);
    assert_eq!(retired.segments().len(), 2 * chunks.len() + 2);
    assert_eq!(visual.draw_count(), 0);

    retired.release(&mut h.arenas);
    assert_eq!(h.arenas.bytes_used(), 0);
}
