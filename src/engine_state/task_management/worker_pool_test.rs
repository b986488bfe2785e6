use super::*;
use crate::core::MtResource;
use crate::engine_state::memory::PooledAllocator;
use crate::engine_state::regions::LogicalRegion;
use crate::engine_state::voxels::block::BlockVisualTable;
use crate::engine_state::voxels::chunk::ChunkBlocks;
use crate::engine_state::voxels::events::chunk_event_channel;
use crate::engine_state::voxels::position::ChunkPosition;
use crate::engine_state::voxels::world::MemoryWorld;

const SIZE: [u32; 3] = [2, 1, 2];

fn mesher() -> VoxelMesher {
    VoxelMesher::new(
        Arc::new(BlockVisualTable::with_opaque_blocks(2)),
        Arc::new(PooledAllocator::default()),
    )
}

fn world_with_chunks(chunks: &[ChunkPosition]) -> Arc<MemoryWorld> {
    let (events, _receiver) = chunk_event_channel();
    let world = MemoryWorld::new(events);
    for &chunk in chunks {
        world.insert_chunk(chunk, ChunkBlocks::checkerboard(1));
    }
    Arc::new(world)
}

fn region_with(position: RegionPosition, chunks: &[ChunkPosition]) -> RegionHandle {
    let mut region = LogicalRegion::new(position, SIZE);
    for &chunk in chunks {
        region.add_chunk(chunk, false);
    }
    MtResource::new(region)
}

fn wait_for(pool: &mut MeshingWorkerPool, count: usize) -> Vec<RegionMeshOutcome> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut outcomes = Vec::new();
    while outcomes.len() < count && Instant::now() < deadline {
        outcomes.extend(pool.process_completed_tasks());
        thread::sleep(Duration::from_millis(1));
    }
    outcomes
}

#[test]
fn test_workers_remesh_published_regions() {
    let chunks: Vec<ChunkPosition> = (0..4)
        .map(|x| ChunkPosition::new(x, 0, 0))
        .collect();
    let world = world_with_chunks(&chunks);
    let mut pool = MeshingWorkerPool::new(2, world, mesher(), 2);
    assert_eq!(pool.worker_count(), 2);

    let left = RegionPosition::new(0, 0, 0);
    let right = RegionPosition::new(1, 0, 0);
    let regions = [
        (left, region_with(left, &chunks[..2])),
        (right, region_with(right, &chunks[2..])),
    ];
    for (position, region) in &regions {
        assert!(pool.publish_task(*position, region.clone()));
        assert!(!pool.publish_task(*position, region.clone()));
    }
    assert_eq!(pool.tasks_in_flight(), 2);

    let outcomes = wait_for(&mut pool, 2);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.status == RegionMeshStatus::Updated && !outcome.still_dirty));
    assert_eq!(pool.tasks_in_flight(), 0);

    for (_, region) in &regions {
        let region = region.get();
        let meshed = region
            .chunks()
            .iter()
            .filter(|slot| slot.mesh.is_some())
            .count();
        assert_eq!(meshed, 2);
    }

    assert!(pool.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_busy_region_is_reported_untouched() {
    let chunk = ChunkPosition::new(0, 0, 0);
    let world = world_with_chunks(&[chunk]);
    let mut pool = MeshingWorkerPool::new(1, world, mesher(), 2);
    let position = RegionPosition::new(0, 0, 0);
    let region = region_with(position, &[chunk]);

    let outcomes = {
        let _held = region.get_mut();
        pool.publish_task(position, region.clone());
        wait_for(&mut pool, 1)
    };

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, RegionMeshStatus::Busy);
    assert!(region.get().is_dirty());
    assert!(pool.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_drains_queued_tasks() {
    let chunks: Vec<ChunkPosition> = (0..8)
        .map(|z| ChunkPosition::new(0, 0, z * 2))
        .collect();
    let world = world_with_chunks(&chunks);
    let mut pool = MeshingWorkerPool::new(1, world, mesher(), 2);

    let regions: Vec<_> = chunks
        .iter()
        .map(|&chunk| {
            let position = chunk.region(SIZE);
            (position, region_with(position, &[chunk]))
        })
        .collect();
    for (position, region) in &regions {
        pool.publish_task(*position, region.clone());
    }

    assert!(pool.shutdown(Duration::from_secs(10)));
    for (_, region) in &regions {
        assert!(!region.get().is_dirty());
    }
}
