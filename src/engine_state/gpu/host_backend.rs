//! # Host Backend
//!
//! An in-memory [`GpuBackend`]: buffers are byte vectors, recorded copies execute
//! in order when the recorder is submitted, and a fence signals after a fixed
//! number of [`GpuBackend::poll`] calls. It runs the whole streaming pipeline
//! without a device, and lets callers read back every buffer to check what a
//! real GPU would have drawn.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use wgpu::util::DrawIndexedIndirectArgs;

use crate::engine_state::rendering::vertex::{
    ChunkRenderInfo, ChunkVertex, CHUNK_VERTEX_STRIDE, INDEX_STRIDE, INDIRECT_STRIDE,
    RENDER_INFO_STRIDE,
};

use super::backend::{BufferRole, CommandRecorder, Fence, GpuBackend, RenderRecorder};

struct HostBufferData {
    label: String,
    role: BufferRole,
    bytes: Mutex<Vec<u8>>,
}

/// A byte vector standing in for a GPU buffer. Clones share storage.
#[derive(Clone)]
pub struct HostBuffer(Arc<HostBufferData>);

impl HostBuffer {
    /// Debug label given at creation.
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Usage role given at creation.
    pub fn role(&self) -> BufferRole {
        self.0.role
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.lock().len() as u64
    }

    /// Copies `length` bytes starting at `offset`.
    ///
    /// # Panics
    /// When the range exceeds the buffer
    pub fn read(&self, offset: u64, length: u64) -> Vec<u8> {
        let bytes = self.lock();
        let range = checked_range(&self.0.label, bytes.len(), offset, length);
        bytes[range].to_vec()
    }

    /// True when both handles name the same storage.
    pub fn same_buffer(&self, other: &HostBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("label", &self.0.label)
            .field("role", &self.0.role)
            .field("size", &self.size())
            .finish()
    }
}

fn checked_range(label: &str, size: usize, offset: u64, length: u64) -> std::ops::Range<usize> {
    let start = offset as usize;
    let end = start + length as usize;
    assert!(
        end <= size,
        "access {start}..{end} out of bounds of `{label}` ({size} bytes)"
    );
    start..end
}

#[derive(Debug)]
struct HostCopy {
    source: HostBuffer,
    source_offset: u64,
    destination: HostBuffer,
    destination_offset: u64,
    size: u64,
}

/// Transfer commands waiting for submission.
#[derive(Debug)]
pub struct HostRecorder {
    label: String,
    copies: Vec<HostCopy>,
}

impl HostRecorder {
    /// Label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Copies recorded so far.
    pub fn copy_count(&self) -> usize {
        self.copies.len()
    }
}

impl CommandRecorder<HostBuffer> for HostRecorder {
    fn copy_buffer_to_buffer(
        &mut self,
        source: &HostBuffer,
        source_offset: u64,
        destination: &HostBuffer,
        destination_offset: u64,
        size: u64,
    ) {
        self.copies.push(HostCopy {
            source: source.clone(),
            source_offset,
            destination: destination.clone(),
            destination_offset,
            size,
        });
    }
}

/// Counts down to zero as the backend is polled.
#[derive(Debug, Clone)]
pub struct HostFence(Arc<AtomicU32>);

impl Fence for HostFence {
    fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }
}

/// Activity counters of a [`HostBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Buffers created.
    pub buffers_created: u64,
    /// Recorders submitted.
    pub submissions: u64,
    /// Copy commands executed.
    pub copy_commands: u64,
    /// Bytes moved by copy commands.
    pub bytes_copied: u64,
    /// Bytes uploaded with `write_buffer`.
    pub bytes_written: u64,
}

/// The in-memory device.
pub struct HostBackend {
    fence_latency: u32,
    pending_fences: Mutex<Vec<Arc<AtomicU32>>>,
    buffers_created: AtomicU64,
    submissions: AtomicU64,
    copy_commands: AtomicU64,
    bytes_copied: AtomicU64,
    bytes_written: AtomicU64,
}

impl HostBackend {
    /// Creates a backend whose fences signal after `fence_latency` polls.
    pub fn new(fence_latency: u32) -> Self {
        Self {
            fence_latency,
            pending_fences: Mutex::new(Vec::new()),
            buffers_created: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            copy_commands: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// A snapshot of the activity counters.
    pub fn stats(&self) -> HostStats {
        HostStats {
            buffers_created: self.buffers_created.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            copy_commands: self.copy_commands.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Fences not yet signaled.
    pub fn pending_fence_count(&self) -> usize {
        self.pending_fences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GpuBackend for HostBackend {
    type Buffer = HostBuffer;
    type Recorder = HostRecorder;
    type Fence = HostFence;

    fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Self::Buffer {
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        HostBuffer(Arc::new(HostBufferData {
            label: label.to_owned(),
            role,
            bytes: Mutex::new(vec![0; size as usize]),
        }))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let mut bytes = buffer.lock();
        let range = checked_range(buffer.label(), bytes.len(), offset, data.len() as u64);
        bytes[range].copy_from_slice(data);
        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
    }

    fn create_recorder(&self, label: &str) -> Self::Recorder {
        HostRecorder {
            label: label.to_owned(),
            copies: Vec::new(),
        }
    }

    fn submit(&self, recorder: Self::Recorder) -> Self::Fence {
        for copy in &recorder.copies {
            let data = copy.source.read(copy.source_offset, copy.size);
            let mut destination = copy.destination.lock();
            let range = checked_range(
                copy.destination.label(),
                destination.len(),
                copy.destination_offset,
                copy.size,
            );
            destination[range].copy_from_slice(&data);
            self.bytes_copied.fetch_add(copy.size, Ordering::Relaxed);
        }
        self.copy_commands
            .fetch_add(recorder.copies.len() as u64, Ordering::Relaxed);
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let countdown = Arc::new(AtomicU32::new(self.fence_latency));
        if self.fence_latency > 0 {
            self.pending_fences
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(countdown.clone());
        }
        HostFence(countdown)
    }

    fn poll(&self) {
        let mut pending = self
            .pending_fences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.retain(|countdown| countdown.fetch_sub(1, Ordering::AcqRel) > 1);
    }
}

/// One draw recorded by a [`HostRenderPass`], resolved against the bound buffers.
#[derive(Debug, Clone)]
pub struct ResolvedDraw {
    /// The indirect record as the GPU would read it.
    pub args: DrawIndexedIndirectArgs,
    /// The render-info record selected by `first_instance`.
    pub render_info: ChunkRenderInfo,
    /// The vertices referenced by the draw's indices, in index order.
    pub vertices: Vec<ChunkVertex>,
}

#[derive(Debug)]
struct HostDraw {
    indirect: HostBuffer,
    offset: u64,
    count: u32,
}

/// Records draw calls for later inspection.
#[derive(Debug, Default)]
pub struct HostRenderPass {
    bound: Option<[HostBuffer; 3]>,
    draws: Vec<HostDraw>,
}

impl HostRenderPass {
    /// An empty pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `multi_draw_indexed_indirect` calls.
    pub fn multi_draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Total draws across all multi-draw calls.
    pub fn draw_count(&self) -> u32 {
        self.draws.iter().map(|draw| draw.count).sum()
    }

    /// Reads every indirect record and follows it into the bound buffers.
    ///
    /// # Panics
    /// When a draw was recorded without bound buffers or reads out of bounds
    pub fn resolve(&self) -> Vec<ResolvedDraw> {
        let mut resolved = Vec::new();
        for draw in &self.draws {
            let Some([index, vertex, render_info]) = &self.bound else {
                panic!("draw recorded without geometry buffers");
            };
            for record in 0..draw.count as u64 {
                let raw = draw.indirect.read(
                    draw.offset + record * INDIRECT_STRIDE,
                    INDIRECT_STRIDE,
                );
                let words: [u32; 5] = bytemuck::pod_read_unaligned(&raw);
                let args = DrawIndexedIndirectArgs {
                    index_count: words[0],
                    instance_count: words[1],
                    first_index: words[2],
                    base_vertex: words[3] as i32,
                    first_instance: words[4],
                };

                let info_bytes = render_info.read(
                    args.first_instance as u64 * RENDER_INFO_STRIDE,
                    RENDER_INFO_STRIDE,
                );
                let index_bytes = index.read(
                    args.first_index as u64 * INDEX_STRIDE,
                    args.index_count as u64 * INDEX_STRIDE,
                );
                let vertices = index_bytes
                    .chunks_exact(INDEX_STRIDE as usize)
                    .map(|bytes| {
                        let local: u32 = bytemuck::pod_read_unaligned(bytes);
                        let at = (args.base_vertex as i64 + local as i64) as u64;
                        let raw = vertex.read(at * CHUNK_VERTEX_STRIDE, CHUNK_VERTEX_STRIDE);
                        bytemuck::pod_read_unaligned(&raw)
                    })
                    .collect();

                resolved.push(ResolvedDraw {
                    args,
                    render_info: bytemuck::pod_read_unaligned(&info_bytes),
                    vertices,
                });
            }
        }
        resolved
    }
}

impl RenderRecorder<HostBuffer> for HostRenderPass {
    fn set_geometry_buffers(&mut self, index: &HostBuffer, vertex: &HostBuffer, render_info: &HostBuffer) {
        self.bound = Some([index.clone(), vertex.clone(), render_info.clone()]);
    }

    fn multi_draw_indexed_indirect(&mut self, indirect: &HostBuffer, indirect_offset: u64, count: u32) {
        self.draws.push(HostDraw {
            indirect: indirect.clone(),
            offset: indirect_offset,
            count,
        });
    }
}
