use super::*;
use crate::engine_state::gpu::host_backend::HostBackend;

const KIB: u64 = 1024;

fn arena(backend: &HostBackend, capacity: u64) -> GraphicsArenaAllocator<HostBackend> {
    GraphicsArenaAllocator::new(backend, ArenaChannel::Vertex, capacity, 256)
}

struct Owners<'a>(&'a mut [ArenaSegment]);

impl LiveSegments for Owners<'_> {
    fn for_each_live_segment(
        &mut self,
        channel: ArenaChannel,
        visit: &mut dyn FnMut(&mut ArenaSegment),
    ) {
        assert_eq!(channel, ArenaChannel::Vertex);
        for segment in self.0.iter_mut() {
            visit(segment);
        }
    }
}

#[test]
fn test_alloc_free_round_trip_restores_single_range() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, KIB);

    let a = arena.try_alloc(100, 4).unwrap();
    let b = arena.try_alloc(60, 16).unwrap();
    let c = arena.try_alloc(200, 4).unwrap();
    assert_eq!(arena.bytes_used(), 360);
    assert_eq!(b.offset % 16, 0);
    assert_eq!(arena.bytes_used() + arena.bytes_free(), arena.byte_capacity());

    arena.free(b);
    arena.free(a);
    arena.free(c);

    assert_eq!(arena.bytes_used(), 0);
    assert_eq!(arena.free_range_count(), 1);
    assert_eq!(arena.largest_free_range(), arena.byte_capacity());
}

#[test]
fn test_bytes_used_matches_live_segments_under_random_churn() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, 64 * KIB);
    let mut rng = fastrand::Rng::with_seed(42);
    let mut live: Vec<ArenaSegment> = Vec::new();

    for _ in 0..2000 {
        if !live.is_empty() && rng.bool() {
            let segment = live.swap_remove(rng.usize(..live.len()));
            arena.free(segment);
        } else {
            let length = rng.u64(1..64) * 4;
            let alignment = [4, 16][rng.usize(..2)];
            if let Some(segment) = arena.try_alloc(length, alignment) {
                assert_eq!(segment.offset % alignment, 0);
                live.push(segment);
            }
        }
        let expected: u64 = live.iter().map(|segment| segment.length).sum();
        assert_eq!(arena.bytes_used(), expected);
        assert_eq!(arena.bytes_used() + arena.bytes_free(), arena.byte_capacity());
    }

    live.sort_by_key(|segment| segment.offset);
    for pair in live.windows(2) {
        assert!(pair[0].end() <= pair[1].offset, "segments overlap");
    }
}

#[test]
fn test_zero_length_is_sentinel() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, KIB);
    let segment = arena.try_alloc(0, 16).unwrap();
    assert!(segment.is_empty());
    arena.free(segment);
    assert_eq!(arena.bytes_used(), 0);
}

#[test]
fn test_alloc_fails_when_fragmented() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, 256);
    let segments: Vec<_> = (0..4).map(|_| arena.try_alloc(64, 4).unwrap()).collect();
    arena.free(segments[0]);
    arena.free(segments[2]);

    assert_eq!(arena.bytes_free(), 128);
    assert_eq!(arena.largest_free_range(), 64);
    assert!(arena.try_alloc(128, 4).is_none());
}

#[test]
#[should_panic(expected = "double free")]
fn test_double_free_panics() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, KIB);
    let segment = arena.try_alloc(64, 4).unwrap();
    arena.free(segment);
    arena.free(segment);
}

#[test]
fn test_compaction_preserves_contents_and_rewrites_offsets() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, 512);

    let segments: Vec<ArenaSegment> =
        (0..8).map(|_| arena.try_alloc(64, 16).unwrap()).collect();
    for (i, segment) in segments.iter().enumerate() {
        backend.write_buffer(arena.buffer(), segment.offset, &[i as u8 + 1; 64]);
    }
    // Punch holes so the survivors are no longer contiguous.
    for i in [0, 3, 6] {
        arena.free(segments[i]);
    }
    let mut survivors: Vec<ArenaSegment> = [1, 2, 4, 5, 7].iter().map(|&i| segments[i]).collect();
    assert!(arena.try_alloc(400, 16).is_none());
    let generation = arena.generation();

    let mut recorder = backend.create_recorder("compaction");
    let old_buffer = arena.resize_with_compaction(
        &backend,
        &mut recorder,
        320 + 400,
        &mut Owners(&mut survivors),
    );
    // 1-2 and 4-5 are adjacent pairs, 7 is alone after them: three copy runs.
    assert_eq!(recorder.copy_count(), 3);
    backend.submit(recorder);

    assert_eq!(arena.generation(), generation + 1);
    assert!(arena.byte_capacity() >= 720);
    assert_eq!(arena.byte_capacity() % 256, 0);
    assert_eq!(arena.bytes_used(), 320);
    assert_eq!(old_buffer.size(), 512);

    let expected_bytes = [2u8, 3, 5, 6, 8];
    for (k, segment) in survivors.iter().enumerate() {
        assert_eq!(segment.offset, k as u64 * 64);
        assert_eq!(
            arena.buffer().read(segment.offset, 64),
            vec![expected_bytes[k]; 64]
        );
    }

    let fresh = arena.try_alloc(400, 16).unwrap();
    assert_eq!(fresh.offset, 320);

    for segment in survivors.drain(..) {
        arena.free(segment);
    }
    arena.free(fresh);
    assert_eq!(arena.bytes_used(), 0);
}

#[test]
fn test_free_if_current_skips_stale_generation() {
    let backend = HostBackend::default();
    let mut arena = arena(&backend, 256);
    let stale = arena.try_alloc(64, 4).unwrap();
    let generation = arena.generation();

    let mut none: [ArenaSegment; 0] = [];
    let mut recorder = backend.create_recorder("grow");
    arena.resize_with_compaction(&backend, &mut recorder, 512, &mut Owners(&mut none));
    assert_eq!(arena.bytes_used(), 0);

    arena.free_if_current(stale, generation);
    assert_eq!(arena.bytes_used(), 0);
    assert_eq!(arena.free_range_count(), 1);
}

#[test]
fn test_arena_set_routes_channels() {
    let backend = HostBackend::default();
    let mut arenas = ArenaSet::new(&backend, 100, 64);
    for channel in ArenaChannel::ALL {
        assert_eq!(arenas.get(channel).channel(), channel);
        assert_eq!(arenas.get(channel).byte_capacity(), 128);
    }
    arenas.get_mut(ArenaChannel::Index).try_alloc(40, 4).unwrap();
    assert_eq!(arenas.bytes_used(), 40);
    assert_eq!(arenas.byte_capacity(), 512);
    assert_eq!(arenas.draw_generations(), [0, 0, 0]);
}

#[test]
fn test_align_up() {
    assert_eq!(align_up(0, 16), 0);
    assert_eq!(align_up(1, 16), 16);
    assert_eq!(align_up(32, 16), 32);
    assert_eq!(align_up(33, 4), 36);
}
