//! # GPU Arena Allocator
//!
//! A [`GraphicsArenaAllocator`] hands out byte ranges of one fixed-capacity GPU
//! buffer. All regions share four of them (index, vertex, indirect and render
//! info), which lets a single bind serve every region and keeps buffer creation
//! off the frame path.
//!
//! ## Free List
//!
//! Free space is a `BTreeMap<offset, length>` kept fully coalesced: no two free
//! ranges ever touch. Allocation is first fit in offset order; alignment padding
//! in front of a segment stays on the free list. Freeing merges with both
//! neighbors. Freeing a range that overlaps free space is a double free and
//! panics.
//!
//! ## Growth
//!
//! The arena never grows by itself. When an allocation fails the owner calls
//! [`GraphicsArenaAllocator::resize_with_compaction`], which packs every live
//! segment to the front of a new, larger buffer with GPU copies and rewrites the
//! owners' offsets in place through [`LiveSegments`]. The old buffer is returned
//! so it can outlive the copies that read from it.

use std::collections::{BTreeMap, HashMap};

use super::backend::{BufferRole, GpuBackend};
use super::copy_batch::CopyBatch;

/// Copy offsets and sizes must be multiples of this on every backend.
pub const COPY_ALIGNMENT: u64 = 4;

/// A byte range inside an arena buffer. A zero length means "not allocated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArenaSegment {
    /// First byte.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl ArenaSegment {
    /// The unallocated sentinel.
    pub const EMPTY: ArenaSegment = ArenaSegment {
        offset: 0,
        length: 0,
    };

    /// True for the sentinel.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Which shared arena a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaChannel {
    /// `u32` indices.
    Index,
    /// Interleaved vertices.
    Vertex,
    /// Indirect draw records.
    Indirect,
    /// Per-draw render info.
    RenderInfo,
}

impl ArenaChannel {
    /// All channels, in upload order.
    pub const ALL: [ArenaChannel; 4] = [
        ArenaChannel::Indirect,
        ArenaChannel::RenderInfo,
        ArenaChannel::Index,
        ArenaChannel::Vertex,
    ];

    /// The buffer role backing this channel.
    pub fn role(&self) -> BufferRole {
        match self {
            ArenaChannel::Index => BufferRole::Index,
            ArenaChannel::Vertex => BufferRole::Vertex,
            ArenaChannel::Indirect => BufferRole::Indirect,
            ArenaChannel::RenderInfo => BufferRole::RenderInfo,
        }
    }

    /// Debug label of the backing buffer.
    pub fn label(&self) -> &'static str {
        match self {
            ArenaChannel::Index => "chunk index arena",
            ArenaChannel::Vertex => "chunk vertex arena",
            ArenaChannel::Indirect => "chunk indirect arena",
            ArenaChannel::RenderInfo => "chunk render info arena",
        }
    }
}

/// Yields every live segment of one channel so a compaction can move it.
pub trait LiveSegments {
    /// Calls `visit` once per live segment of `channel`. Sentinels may be
    /// passed; they are ignored.
    fn for_each_live_segment(
        &mut self,
        channel: ArenaChannel,
        visit: &mut dyn FnMut(&mut ArenaSegment),
    );
}

/// Free-list allocator over one GPU buffer.
pub struct GraphicsArenaAllocator<B: GpuBackend> {
    channel: ArenaChannel,
    buffer: B::Buffer,
    free_ranges: BTreeMap<u64, u64>,
    byte_capacity: u64,
    bytes_used: u64,
    granularity: u64,
    max_alignment: u64,
    generation: u32,
}

impl<B: GpuBackend> GraphicsArenaAllocator<B> {
    /// Creates an arena with one free range spanning the whole buffer.
    ///
    /// # Arguments
    /// * `backend` - Device creating the buffer
    /// * `channel` - Which data the arena holds
    /// * `initial_capacity` - Starting size, rounded up to `granularity`
    /// * `granularity` - Power of two every capacity is a multiple of
    pub fn new(backend: &B, channel: ArenaChannel, initial_capacity: u64, granularity: u64) -> Self {
        assert!(
            granularity.is_power_of_two(),
            "arena granularity must be a power of two"
        );
        let byte_capacity = align_up(initial_capacity.max(1), granularity);
        let buffer = backend.create_buffer(channel.label(), byte_capacity, channel.role());
        let mut free_ranges = BTreeMap::new();
        free_ranges.insert(0, byte_capacity);

        Self {
            channel,
            buffer,
            free_ranges,
            byte_capacity,
            bytes_used: 0,
            granularity,
            max_alignment: COPY_ALIGNMENT,
            generation: 0,
        }
    }

    /// Finds the first free range that fits `length` bytes at `alignment`.
    ///
    /// # Returns
    /// The segment, the sentinel for a zero length, or `None` when no free range fits
    pub fn try_alloc(&mut self, length: u64, alignment: u64) -> Option<ArenaSegment> {
        if length == 0 {
            return Some(ArenaSegment::EMPTY);
        }
        let alignment = alignment.max(COPY_ALIGNMENT);
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let (start, range_length, aligned) = self.free_ranges.iter().find_map(|(&start, &len)| {
            let aligned = align_up(start, alignment);
            (aligned - start + length <= len).then_some((start, len, aligned))
        })?;

        self.free_ranges.remove(&start);
        if aligned > start {
            self.free_ranges.insert(start, aligned - start);
        }
        let tail = start + range_length - (aligned + length);
        if tail > 0 {
            self.free_ranges.insert(aligned + length, tail);
        }

        self.bytes_used += length;
        self.max_alignment = self.max_alignment.max(alignment);
        Some(ArenaSegment {
            offset: aligned,
            length,
        })
    }

    /// Returns a segment to the free list.
    ///
    /// # Panics
    /// When the segment lies outside the buffer or overlaps free space
    pub fn free(&mut self, segment: ArenaSegment) {
        if segment.is_empty() {
            return;
        }
        assert!(
            segment.end() <= self.byte_capacity,
            "{}: freed segment {:?} exceeds capacity {}",
            self.channel.label(),
            segment,
            self.byte_capacity
        );

        let previous = self
            .free_ranges
            .range(..=segment.offset)
            .next_back()
            .map(|(&start, &len)| (start, len));
        let next = self
            .free_ranges
            .range(segment.offset..)
            .next()
            .map(|(&start, &len)| (start, len));

        if let Some((start, len)) = previous {
            if start + len > segment.offset {
                panic!(
                    "{}: double free of {:?}, overlaps free range at {start}",
                    self.channel.label(),
                    segment
                );
            }
        }
        if let Some((start, _)) = next {
            if start < segment.end() {
                panic!(
                    "{}: double free of {:?}, overlaps free range at {start}",
                    self.channel.label(),
                    segment
                );
            }
        }

        let mut start = segment.offset;
        let mut length = segment.length;
        if let Some((previous_start, previous_length)) = previous {
            if previous_start + previous_length == start {
                self.free_ranges.remove(&previous_start);
                start = previous_start;
                length += previous_length;
            }
        }
        if let Some((next_start, next_length)) = next {
            if next_start == segment.end() {
                self.free_ranges.remove(&next_start);
                length += next_length;
            }
        }
        self.free_ranges.insert(start, length);
        self.bytes_used -= segment.length;
    }

    /// Frees `segment` only if it was allocated in the current generation.
    /// Older segments died with the buffer they pointed into.
    pub fn free_if_current(&mut self, segment: ArenaSegment, generation: u32) {
        if generation == self.generation {
            self.free(segment);
        }
    }

    /// Packs every live segment into a new buffer of at least `min_capacity` bytes.
    ///
    /// Live segments keep their relative order and are each aligned to the largest
    /// alignment ever requested from this arena. Runs of adjacent segments move with
    /// one copy. Owners' offsets are rewritten through `live`.
    ///
    /// # Arguments
    /// * `backend` - Device creating the new buffer
    /// * `recorder` - Receives the copy commands
    /// * `min_capacity` - Bytes the new buffer must hold, live segments included;
    ///   layout padding is added on top, then the result is rounded up to the
    ///   granularity and never drops below the current capacity
    /// * `live` - Owners of every live segment of this channel
    ///
    /// # Returns
    /// The previous buffer, which must stay alive until the copies complete
    pub fn resize_with_compaction(
        &mut self,
        backend: &B,
        recorder: &mut B::Recorder,
        min_capacity: u64,
        live: &mut dyn LiveSegments,
    ) -> B::Buffer {
        let mut segments = Vec::new();
        live.for_each_live_segment(self.channel, &mut |segment| {
            if !segment.is_empty() {
                segments.push(*segment);
            }
        });
        segments.sort_by_key(|segment| segment.offset);

        let mut relocation = HashMap::with_capacity(segments.len());
        let mut batch = CopyBatch::new();
        let mut gaps = Vec::new();
        let mut cursor = 0;
        let mut live_bytes = 0;
        for segment in &segments {
            let destination = align_up(cursor, self.max_alignment);
            if destination > cursor {
                gaps.push((cursor, destination - cursor));
            }
            relocation.insert(segment.offset, destination);
            batch.push(segment.offset, destination, segment.length);
            cursor = destination + segment.length;
            live_bytes += segment.length;
        }

        // Padding introduced by the packed layout comes on top of the request.
        let requested = cursor + min_capacity.saturating_sub(live_bytes);
        let old_capacity = self.byte_capacity;
        let new_capacity = align_up(requested, self.granularity).max(old_capacity);
        let new_buffer = backend.create_buffer(self.channel.label(), new_capacity, self.channel.role());
        let copies = batch.record(recorder, &self.buffer, &new_buffer);

        live.for_each_live_segment(self.channel, &mut |segment| {
            if segment.is_empty() {
                return;
            }
            match relocation.get(&segment.offset) {
                Some(&offset) => segment.offset = offset,
                None => unreachable!("live segment {segment:?} appeared during compaction"),
            }
        });

        self.free_ranges.clear();
        self.free_ranges.extend(gaps);
        if new_capacity > cursor {
            self.free_ranges.insert(cursor, new_capacity - cursor);
        }
        self.byte_capacity = new_capacity;
        self.bytes_used = live_bytes;
        self.generation = self.generation.wrapping_add(1);

        log::info!(
            "Resized {} from {} to {} bytes ({} live segments, {} copies)",
            self.channel.label(),
            old_capacity,
            new_capacity,
            segments.len(),
            copies
        );

        std::mem::replace(&mut self.buffer, new_buffer)
    }

    /// The backing buffer.
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    /// The channel this arena serves.
    pub fn channel(&self) -> ArenaChannel {
        self.channel
    }

    /// Bytes currently allocated.
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    /// Size of the backing buffer.
    pub fn byte_capacity(&self) -> u64 {
        self.byte_capacity
    }

    /// Bytes on the free list, including alignment padding.
    pub fn bytes_free(&self) -> u64 {
        self.free_ranges.values().sum()
    }

    /// Length of the largest free range.
    pub fn largest_free_range(&self) -> u64 {
        self.free_ranges.values().copied().max().unwrap_or(0)
    }

    /// Incremented by every resize.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of disjoint free ranges.
    pub fn free_range_count(&self) -> usize {
        self.free_ranges.len()
    }
}

/// The four shared arenas every visual region allocates from.
pub struct ArenaSet<B: GpuBackend> {
    index: GraphicsArenaAllocator<B>,
    vertex: GraphicsArenaAllocator<B>,
    indirect: GraphicsArenaAllocator<B>,
    render_info: GraphicsArenaAllocator<B>,
}

impl<B: GpuBackend> ArenaSet<B> {
    /// Creates all four arenas with the same initial capacity.
    pub fn new(backend: &B, initial_capacity: u64, granularity: u64) -> Self {
        let arena = |channel| GraphicsArenaAllocator::new(backend, channel, initial_capacity, granularity);
        Self {
            index: arena(ArenaChannel::Index),
            vertex: arena(ArenaChannel::Vertex),
            indirect: arena(ArenaChannel::Indirect),
            render_info: arena(ArenaChannel::RenderInfo),
        }
    }

    /// The arena of `channel`.
    pub fn get(&self, channel: ArenaChannel) -> &GraphicsArenaAllocator<B> {
        match channel {
            ArenaChannel::Index => &self.index,
            ArenaChannel::Vertex => &self.vertex,
            ArenaChannel::Indirect => &self.indirect,
            ArenaChannel::RenderInfo => &self.render_info,
        }
    }

    /// The arena of `channel`, mutably.
    pub fn get_mut(&mut self, channel: ArenaChannel) -> &mut GraphicsArenaAllocator<B> {
        match channel {
            ArenaChannel::Index => &mut self.index,
            ArenaChannel::Vertex => &mut self.vertex,
            ArenaChannel::Indirect => &mut self.indirect,
            ArenaChannel::RenderInfo => &mut self.render_info,
        }
    }

    /// Generations of the arenas an indirect record points into. A region's
    /// draw table is only valid while these match the ones it was written with.
    pub fn draw_generations(&self) -> [u32; 3] {
        [
            self.index.generation(),
            self.vertex.generation(),
            self.render_info.generation(),
        ]
    }

    /// Allocated bytes across all arenas.
    pub fn bytes_used(&self) -> u64 {
        ArenaChannel::ALL
            .iter()
            .map(|&channel| self.get(channel).bytes_used())
            .sum()
    }

    /// Capacity across all arenas.
    pub fn byte_capacity(&self) -> u64 {
        ArenaChannel::ALL
            .iter()
            .map(|&channel| self.get(channel).byte_capacity())
            .sum()
    }
}

/// Rounds `value` up to a multiple of the power of two `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
#[path = "arena_test.rs"]
mod arena_test;
