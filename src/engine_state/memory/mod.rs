//! # Memory Module
//!
//! CPU-side memory used while building meshes: a size-classed block pool and a
//! growable byte buffer that draws its storage from it.

pub mod byte_buffer;
pub mod pool;

pub use byte_buffer::GrowableByteBuffer;
pub use pool::{PoolStats, PooledAllocator};
