//! # Pooled Block Allocator
//!
//! Meshing produces and discards thousands of short-lived byte buffers per second.
//! `PooledAllocator` amortizes that churn by handing out blocks from fixed-width
//! size classes and keeping a bounded stack of freed blocks per class.
//!
//! ## Size Classes
//!
//! Class `i` holds blocks of exactly `(i + 1) * class_width` bytes. A request is
//! rounded up to the next class boundary, so the capacity returned by
//! [`PooledAllocator::alloc`] is always at least the requested count. Requests
//! larger than the biggest class bypass the pool and are plain heap allocations.
//!
//! ## Thread Safety
//!
//! Every class has its own mutex, so workers allocating different sizes never
//! contend. The allocator is shared through `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::config::StreamingConfig;

/// Counters describing how the pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Allocations served from a size class (fresh or recycled).
    pub pooled_allocations: usize,
    /// Allocations that bypassed the pool.
    pub heap_allocations: usize,
    /// Free blocks currently retained across all classes.
    pub retained_blocks: usize,
    /// Bytes held by the retained blocks.
    pub retained_bytes: usize,
}

/// Size-classed allocator for byte blocks.
pub struct PooledAllocator {
    class_width: usize,
    retained_per_class: usize,
    classes: Vec<Mutex<Vec<Box<[u8]>>>>,
    pooled_allocations: AtomicUsize,
    heap_allocations: AtomicUsize,
}

impl PooledAllocator {
    /// Creates an allocator with `max_classes` classes of `class_width` bytes each.
    ///
    /// # Arguments
    /// * `class_width` - Byte step between consecutive size classes
    /// * `max_classes` - Number of classes; requests above `class_width * max_classes` bypass the pool
    /// * `retained_per_class` - Maximum free blocks kept per class
    pub fn new(class_width: usize, max_classes: usize, retained_per_class: usize) -> Self {
        assert!(class_width > 0, "size class width must be non-zero");
        Self {
            class_width,
            retained_per_class,
            classes: (0..max_classes).map(|_| Mutex::new(Vec::new())).collect(),
            pooled_allocations: AtomicUsize::new(0),
            heap_allocations: AtomicUsize::new(0),
        }
    }

    /// Builds the allocator described by the pool options of `config`.
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(
            config.pool_class_width,
            config.pool_max_classes,
            config.pool_retained_per_class,
        )
    }

    /// Largest request still served from a size class.
    pub fn max_pooled_size(&self) -> usize {
        self.class_width * self.classes.len()
    }

    fn class_index(&self, byte_count: usize) -> usize {
        byte_count.max(1).div_ceil(self.class_width) - 1
    }

    /// Hands out a zeroed block of at least `byte_count` bytes.
    ///
    /// # Returns
    /// The block and its actual capacity, which must be passed back to [`PooledAllocator::free`]
    pub fn alloc(&self, byte_count: usize) -> (Box<[u8]>, usize) {
        if byte_count > self.max_pooled_size() {
            self.heap_allocations.fetch_add(1, Ordering::Relaxed);
            return (vec![0u8; byte_count].into_boxed_slice(), byte_count);
        }

        let class = self.class_index(byte_count);
        let capacity = (class + 1) * self.class_width;
        self.pooled_allocations.fetch_add(1, Ordering::Relaxed);

        let recycled = self.classes[class]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match recycled {
            Some(mut block) => {
                block.fill(0);
                (block, capacity)
            }
            None => (vec![0u8; capacity].into_boxed_slice(), capacity),
        }
    }

    /// Returns a block obtained from [`PooledAllocator::alloc`].
    ///
    /// # Panics
    /// When `byte_capacity` is in the pooled range but is not the block size of a
    /// class, or does not match the block. Both mean capacity bookkeeping is broken.
    pub fn free(&self, block: Box<[u8]>, byte_capacity: usize) {
        if byte_capacity > self.max_pooled_size() {
            return;
        }
        if byte_capacity == 0
            || byte_capacity % self.class_width != 0
            || block.len() != byte_capacity
        {
            unreachable!(
                "freed {} byte block as {} bytes, which matches no size class",
                block.len(),
                byte_capacity
            );
        }

        let class = byte_capacity / self.class_width - 1;
        let mut free_stack = self.classes[class]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if free_stack.len() < self.retained_per_class {
            free_stack.push(block);
        }
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            pooled_allocations: self.pooled_allocations.load(Ordering::Relaxed),
            heap_allocations: self.heap_allocations.load(Ordering::Relaxed),
            ..Default::default()
        };
        for (class, free_stack) in self.classes.iter().enumerate() {
            let retained = free_stack
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len();
            stats.retained_blocks += retained;
            stats.retained_bytes += retained * (class + 1) * self.class_width;
        }
        stats
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
