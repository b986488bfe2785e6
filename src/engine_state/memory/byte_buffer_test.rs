use super::*;

fn small_pool() -> Arc<PooledAllocator> {
    Arc::new(PooledAllocator::new(16, 8, 4))
}

#[test]
fn test_append_grows_and_preserves_bytes() {
    let mut buffer = GrowableByteBuffer::new(small_pool());
    assert_eq!(buffer.capacity(), 0);

    for value in 0u32..20 {
        buffer.append(value);
    }

    assert_eq!(buffer.len(), 80);
    assert!(buffer.capacity() >= 80);
    let values: Vec<u32> = buffer
        .as_bytes()
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    assert_eq!(values, (0u32..20).collect::<Vec<_>>());
}

#[test]
fn test_append_range_writes_contiguously() {
    let mut buffer = GrowableByteBuffer::new(small_pool());
    buffer.append_range(&[1u16, 2, 3]);
    buffer.append(4u16);
    assert_eq!(buffer.as_bytes(), bytemuck::cast_slice::<u16, u8>(&[1, 2, 3, 4]));
}

#[test]
fn test_prepare_capacity_only_grows_on_overflow() {
    let mut buffer = GrowableByteBuffer::with_capacity(small_pool(), 30);
    let capacity = buffer.capacity();
    assert_eq!(capacity, 32);

    buffer.prepare_capacity(32);
    assert_eq!(buffer.capacity(), capacity);
}

#[test]
fn test_trim_moves_to_smallest_class() {
    let pool = small_pool();
    let mut buffer = GrowableByteBuffer::with_capacity(pool.clone(), 100);
    buffer.append_bytes(&[9u8; 10]);
    buffer.trim();

    assert_eq!(buffer.capacity(), 16);
    assert_eq!(buffer.as_bytes(), &[9u8; 10]);
    assert_eq!(pool.stats().retained_blocks, 1);
}

#[test]
fn test_drop_returns_block_to_pool() {
    let pool = small_pool();
    {
        let mut buffer = GrowableByteBuffer::new(pool.clone());
        buffer.append_bytes(&[1u8; 40]);
    }
    assert_eq!(pool.stats().retained_blocks, 1);
}
