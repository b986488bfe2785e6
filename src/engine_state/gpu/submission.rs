//! # Fence-Gated Submissions
//!
//! Every frame that uploads geometry submits one recorder together with the
//! staging buffer its copies read from. Both the staging buffer and any resources
//! the frame superseded (old draw tables, old arena buffers) must outlive the GPU
//! work, so they travel with the submission's fence and come back only after the
//! fence is observed signaled.
//!
//! Recorders are single use on every backend, so only staging buffers are
//! recycled.

use std::collections::VecDeque;
use std::time::Duration;

use web_time::Instant;

use super::arena::{align_up, ArenaChannel, ArenaSegment, ArenaSet, COPY_ALIGNMENT};
use super::backend::{BufferRole, Fence, GpuBackend};

/// A segment waiting for the GPU to stop reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetiredSegment {
    /// Arena the segment lives in.
    pub channel: ArenaChannel,
    /// The segment.
    pub segment: ArenaSegment,
    /// Arena generation when the segment was retired.
    pub generation: u32,
}

/// Resources superseded by one submission.
#[derive(Debug)]
pub struct RetiredResources<B: GpuBackend> {
    segments: Vec<RetiredSegment>,
    buffers: Vec<B::Buffer>,
}

impl<B: GpuBackend> Default for RetiredResources<B> {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            buffers: Vec::new(),
        }
    }
}

impl<B: GpuBackend> RetiredResources<B> {
    /// Nothing retired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defers freeing `segment` of `channel`'s arena.
    pub fn retire_segment(&mut self, channel: ArenaChannel, segment: ArenaSegment, generation: u32) {
        if !segment.is_empty() {
            self.segments.push(RetiredSegment {
                channel,
                segment,
                generation,
            });
        }
    }

    /// Defers dropping a buffer.
    pub fn retire_buffer(&mut self, buffer: B::Buffer) {
        self.buffers.push(buffer);
    }

    /// Moves everything from `other` into `self`.
    pub fn append(&mut self, mut other: RetiredResources<B>) {
        self.segments.append(&mut other.segments);
        self.buffers.append(&mut other.buffers);
    }

    /// Retired segments.
    pub fn segments(&self) -> &[RetiredSegment] {
        &self.segments
    }

    /// Number of retired buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// True when nothing is retired.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.buffers.is_empty()
    }

    /// Frees segments still valid in their arena and drops the buffers.
    pub fn release(self, arenas: &mut ArenaSet<B>) {
        for retired in self.segments {
            arenas
                .get_mut(retired.channel)
                .free_if_current(retired.segment, retired.generation);
        }
    }
}

/// A GPU upload buffer and the CPU bytes staged for it this frame.
#[derive(Debug)]
pub struct StagingBuffer<B: GpuBackend> {
    buffer: B::Buffer,
    capacity: u64,
    bytes: Vec<u8>,
}

impl<B: GpuBackend> StagingBuffer<B> {
    /// The GPU side.
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    /// Size of the GPU side.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes staged so far; also the offset of the next push.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// True when nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes still available.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.len()
    }

    /// Appends `data` and returns its staging offset.
    ///
    /// # Panics
    /// When the staging buffer would overflow or `data` breaks copy alignment
    pub fn push(&mut self, data: &[u8]) -> u64 {
        let offset = self.len();
        self.reserve(data.len() as u64).copy_from_slice(data);
        offset
    }

    /// Appends `length` zeroed bytes and returns them for in-place writing.
    pub fn reserve(&mut self, length: u64) -> &mut [u8] {
        assert!(
            length % COPY_ALIGNMENT == 0,
            "staging writes must keep copy alignment"
        );
        assert!(
            length <= self.remaining(),
            "staging overflow: {} bytes requested, {} left",
            length,
            self.remaining()
        );
        let start = self.bytes.len();
        self.bytes.resize(start + length as usize, 0);
        &mut self.bytes[start..]
    }

    /// Uploads the staged bytes to the GPU side.
    pub fn flush(&self, backend: &B) {
        if !self.bytes.is_empty() {
            backend.write_buffer(&self.buffer, 0, &self.bytes);
        }
    }
}

struct InFlight<B: GpuBackend> {
    fence: B::Fence,
    staging: Option<StagingBuffer<B>>,
    retired: RetiredResources<B>,
}

/// Submissions in flight and the staging buffers they will give back.
pub struct SubmissionPool<B: GpuBackend> {
    staging_capacity: u64,
    free_staging: Vec<StagingBuffer<B>>,
    in_flight: VecDeque<InFlight<B>>,
}

impl<B: GpuBackend> SubmissionPool<B> {
    /// Creates an empty pool whose staging buffers hold `staging_capacity` bytes.
    pub fn new(staging_capacity: u64) -> Self {
        Self {
            staging_capacity: align_up(staging_capacity.max(COPY_ALIGNMENT), COPY_ALIGNMENT),
            free_staging: Vec::new(),
            in_flight: VecDeque::new(),
        }
    }

    /// A cleared staging buffer, recycled when one is free.
    pub fn acquire_staging(&mut self, backend: &B) -> StagingBuffer<B> {
        match self.free_staging.pop() {
            Some(mut staging) => {
                staging.bytes.clear();
                staging
            }
            None => {
                log::debug!(
                    "Creating staging buffer of {} bytes ({} in flight)",
                    self.staging_capacity,
                    self.in_flight.len()
                );
                StagingBuffer {
                    buffer: backend.create_buffer(
                        "chunk staging buffer",
                        self.staging_capacity,
                        BufferRole::Staging,
                    ),
                    capacity: self.staging_capacity,
                    bytes: Vec::with_capacity(self.staging_capacity as usize),
                }
            }
        }
    }

    /// Returns a staging buffer that was never submitted.
    pub fn recycle_staging(&mut self, mut staging: StagingBuffer<B>) {
        staging.bytes.clear();
        self.free_staging.push(staging);
    }

    /// Uploads the staging bytes, submits the recorder and keeps everything the
    /// submission depends on until its fence signals.
    pub fn submit(
        &mut self,
        backend: &B,
        recorder: B::Recorder,
        staging: Option<StagingBuffer<B>>,
        retired: RetiredResources<B>,
    ) {
        if let Some(staging) = &staging {
            staging.flush(backend);
        }
        let fence = backend.submit(recorder);
        self.in_flight.push_back(InFlight {
            fence,
            staging,
            retired,
        });
    }

    /// Releases the resources of every submission whose fence has signaled.
    ///
    /// # Returns
    /// The number of submissions reclaimed
    pub fn reclaim(&mut self, arenas: &mut ArenaSet<B>) -> usize {
        let mut reclaimed = 0;
        let mut index = 0;
        while index < self.in_flight.len() {
            if !self.in_flight[index].fence.is_signaled() {
                index += 1;
                continue;
            }
            if let Some(done) = self.in_flight.remove(index) {
                done.retired.release(arenas);
                if let Some(staging) = done.staging {
                    self.recycle_staging(staging);
                }
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Polls until every submission is reclaimed or `timeout` passes.
    ///
    /// # Returns
    /// True when nothing is left in flight
    pub fn drain(&mut self, backend: &B, arenas: &mut ArenaSet<B>, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            backend.poll();
            self.reclaim(arenas);
            if self.in_flight.is_empty() {
                return true;
            }
            if start.elapsed() >= timeout {
                log::warn!(
                    "{} submissions still in flight after {:?}",
                    self.in_flight.len(),
                    timeout
                );
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drops every in-flight submission without waiting; used when the device
    /// that owned them is gone.
    pub fn abandon(&mut self) {
        if !self.in_flight.is_empty() {
            log::warn!("Abandoning {} in-flight submissions", self.in_flight.len());
        }
        self.in_flight.clear();
        self.free_staging.clear();
    }

    /// Submissions awaiting their fence.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Staging buffers ready for reuse.
    pub fn free_staging_count(&self) -> usize {
        self.free_staging.len()
    }
}

#[cfg(test)]
#[path = "submission_test.rs"]
mod submission_test;
