use std::sync::Arc;

use bytemuck::Pod;

use super::pool::PooledAllocator;

/// An append-only byte buffer backed by one pooled block.
///
/// Typed values are appended as their raw bytes, so the buffer can be copied to the
/// GPU as-is. The backing block is swapped for a larger class only when an append
/// would overflow it, and goes back to the pool on drop.
pub struct GrowableByteBuffer {
    pool: Arc<PooledAllocator>,
    block: Box<[u8]>,
    capacity: usize,
    len: usize,
}

impl GrowableByteBuffer {
    /// Creates an empty buffer; no block is taken until the first append.
    pub fn new(pool: Arc<PooledAllocator>) -> Self {
        Self {
            pool,
            block: Box::default(),
            capacity: 0,
            len: 0,
        }
    }

    /// Creates a buffer with room for at least `byte_count` bytes.
    pub fn with_capacity(pool: Arc<PooledAllocator>, byte_count: usize) -> Self {
        let mut buffer = Self::new(pool);
        buffer.prepare_capacity(byte_count);
        buffer
    }

    /// Ensures `additional` more bytes fit after the cursor.
    ///
    /// Growth at least doubles the capacity so repeated appends stay amortized O(1).
    pub fn prepare_capacity(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.capacity {
            return;
        }

        let target = required.max(self.capacity * 2);
        let (mut block, capacity) = self.pool.alloc(target);
        block[..self.len].copy_from_slice(&self.block[..self.len]);
        self.replace_block(block, capacity);
    }

    /// Appends the bytes of one value.
    pub fn append<T: Pod>(&mut self, value: T) {
        self.append_bytes(bytemuck::bytes_of(&value));
    }

    /// Appends the bytes of a slice of values.
    pub fn append_range<T: Pod>(&mut self, values: &[T]) {
        self.append_bytes(bytemuck::cast_slice(values));
    }

    /// Appends raw bytes.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.prepare_capacity(bytes.len());
        self.block[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Moves the contents into the smallest block that holds them.
    ///
    /// An empty buffer gives its block back entirely.
    pub fn trim(&mut self) {
        if self.len == 0 {
            self.replace_block(Box::default(), 0);
            return;
        }

        let (mut block, capacity) = self.pool.alloc(self.len);
        if capacity >= self.capacity {
            self.pool.free(block, capacity);
            return;
        }
        block[..self.len].copy_from_slice(&self.block[..self.len]);
        self.replace_block(block, capacity);
    }

    /// Resets the cursor, keeping the block.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.block[..self.len]
    }

    /// Number of written bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available before the next reallocation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn replace_block(&mut self, block: Box<[u8]>, capacity: usize) {
        let old = std::mem::replace(&mut self.block, block);
        let old_capacity = std::mem::replace(&mut self.capacity, capacity);
        if old_capacity > 0 {
            self.pool.free(old, old_capacity);
        }
    }
}

impl Drop for GrowableByteBuffer {
    fn drop(&mut self) {
        self.replace_block(Box::default(), 0);
    }
}

impl std::fmt::Debug for GrowableByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowableByteBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
#[path = "byte_buffer_test.rs"]
mod byte_buffer_test;
