//! # GPU Backend Seam
//!
//! The streaming pipeline needs very little from a graphics API: buffers it can
//! copy between, a way to upload bytes, a command recorder, a fence per
//! submission, and an indexed-indirect multi-draw. These traits name exactly that,
//! so the arena and region code is written once and runs on `wgpu`
//! ([`super::wgpu_backend`]) or the in-memory [`super::host_backend`].
//!
//! Buffer handles are opaque and cheaply cloneable. Cloning a handle never copies
//! GPU memory.

use std::fmt::Debug;

/// What a buffer is used for; backends map this to their usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// `u32` index data, copy source and destination.
    Index,
    /// Interleaved chunk vertices, copy source and destination.
    Vertex,
    /// Indexed-indirect draw arguments.
    Indirect,
    /// Per-draw instance records.
    RenderInfo,
    /// CPU-written upload source.
    Staging,
}

/// Completion signal of one submission.
pub trait Fence {
    /// Non-blocking check; true once the GPU finished the submission.
    fn is_signaled(&self) -> bool;
}

/// Records transfer commands for one submission.
pub trait CommandRecorder<B> {
    /// Copies `size` bytes between two buffers.
    fn copy_buffer_to_buffer(
        &mut self,
        source: &B,
        source_offset: u64,
        destination: &B,
        destination_offset: u64,
        size: u64,
    );
}

/// Records draw commands inside a render pass.
pub trait RenderRecorder<B> {
    /// Binds the arena buffers every region draws from.
    fn set_geometry_buffers(&mut self, index: &B, vertex: &B, render_info: &B);

    /// Issues `count` indexed draws whose arguments start at `indirect_offset`.
    fn multi_draw_indexed_indirect(&mut self, indirect: &B, indirect_offset: u64, count: u32);
}

/// A graphics device as seen by the streaming pipeline.
pub trait GpuBackend {
    /// Opaque buffer handle.
    type Buffer: Clone + Debug;
    /// Transfer command recorder.
    type Recorder: CommandRecorder<Self::Buffer>;
    /// Submission fence.
    type Fence: Fence;

    /// Creates a zero-initialized buffer.
    fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Self::Buffer;

    /// Schedules a CPU upload that lands before the next submission executes.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Starts recording a submission.
    fn create_recorder(&self, label: &str) -> Self::Recorder;

    /// Submits recorded commands.
    fn submit(&self, recorder: Self::Recorder) -> Self::Fence;

    /// Lets the device make progress on completion callbacks without blocking.
    fn poll(&self);
}
