use super::*;

#[test]
fn test_requests_round_up_to_class() {
    let pool = PooledAllocator::new(1024, 4, 2);
    let (block, capacity) = pool.alloc(1);
    assert_eq!(capacity, 1024);
    assert_eq!(block.len(), 1024);

    let (block2, capacity2) = pool.alloc(1025);
    assert_eq!(capacity2, 2048);

    pool.free(block, capacity);
    pool.free(block2, capacity2);
    assert_eq!(pool.stats().retained_blocks, 2);
}

#[test]
fn test_recycled_blocks_are_zeroed() {
    let pool = PooledAllocator::new(64, 2, 4);
    let (mut block, capacity) = pool.alloc(10);
    block[0] = 0xAB;
    pool.free(block, capacity);

    let (block, _) = pool.alloc(10);
    assert!(block.iter().all(|&byte| byte == 0));
    assert_eq!(pool.stats().retained_blocks, 0);
}

#[test]
fn test_retained_blocks_are_capped() {
    let pool = PooledAllocator::new(64, 1, 2);
    let blocks: Vec<_> = (0..5).map(|_| pool.alloc(64)).collect();
    for (block, capacity) in blocks {
        pool.free(block, capacity);
    }
    let stats = pool.stats();
    assert_eq!(stats.retained_blocks, 2);
    assert_eq!(stats.retained_bytes, 128);
}

#[test]
fn test_oversized_requests_bypass_pool() {
    let pool = PooledAllocator::new(64, 2, 2);
    let (block, capacity) = pool.alloc(500);
    assert_eq!(capacity, 500);
    pool.free(block, capacity);

    let stats = pool.stats();
    assert_eq!(stats.heap_allocations, 1);
    assert_eq!(stats.pooled_allocations, 0);
    assert_eq!(stats.retained_blocks, 0);
}

#[test]
#[should_panic]
fn test_free_with_mismatched_capacity_is_fatal() {
    let pool = PooledAllocator::new(64, 4, 2);
    let (block, _) = pool.alloc(64);
    pool.free(block, 100);
}
