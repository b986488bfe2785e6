//! # Voxel Streaming Demo
//!
//! Streams a generated world through the engine on the in-memory backend.
//! Set `RUST_LOG=info` (or `debug`) to see what it does.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release
//! ```

fn main() {
    voxel_streaming::run();
}
