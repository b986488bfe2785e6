//! # GPU Module
//!
//! Everything between finished meshes and draw calls that does not depend on
//! which region the data belongs to.
//!
//! ## Key Components
//!
//! * `backend` - The traits the pipeline talks to a device through
//! * `arena` - Free-list allocators over the four shared geometry buffers
//! * `copy_batch` - Merges adjacent buffer copies
//! * `submission` - Fence-gated staging buffers and retired resources
//! * `wgpu_backend` / `host_backend` - A real device and an in-memory one

pub mod arena;
pub mod backend;
pub mod copy_batch;
pub mod host_backend;
pub mod submission;
pub mod wgpu_backend;

pub use arena::{ArenaChannel, ArenaSegment, ArenaSet, GraphicsArenaAllocator, LiveSegments};
pub use backend::{BufferRole, CommandRecorder, Fence, GpuBackend, RenderRecorder};
pub use host_backend::{HostBackend, HostBuffer, HostRenderPass};
pub use submission::{RetiredResources, StagingBuffer, SubmissionPool};
pub use wgpu_backend::WgpuBackend;
