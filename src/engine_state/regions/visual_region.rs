//! # Visual Region
//!
//! The render-thread mirror of a [`LogicalRegion`]: for every chunk slot it
//! remembers which version the GPU holds and where its index and vertex data
//! live in the shared arenas. Per region it owns one draw table, a run of
//! indirect records and a parallel run of render-info records, so the whole
//! region draws with a single `multi_draw_indexed_indirect`.
//!
//! ## Encoding
//!
//! [`VisualRegion::encode`] uploads the difference between the two sides within
//! a byte budget:
//!
//! 1. The draw records of chunks that stay resident are always rewritten, so
//!    they are paid for first. If they alone exceed the budget nothing happens.
//! 2. Chunks whose version changed to an empty mesh are cleared for free.
//!    Changed chunks with geometry are accepted in slot order until the first
//!    one whose payload (plus a draw record when it is new) does not fit.
//! 3. Accepted chunks keep their segments when the size matches exactly and are
//!    reallocated otherwise. A failed allocation compacts the arena into a
//!    larger buffer and retries.
//! 4. The new draw table, the index payloads and the interleaved vertex
//!    payloads are written to staging in that order and copied into place with
//!    one merged copy batch per arena.
//!
//! Chunks that did not fit keep their old geometry on screen and are picked up
//! by the next call.
//!
//! ## Stale Tables
//!
//! Indirect records hold absolute offsets into the index, vertex and
//! render-info arenas. When any of them is compacted the table is stale: it is
//! skipped at render time and rewritten by the next encode, which then uploads
//! only the table.

use std::collections::HashMap;

use wgpu::util::DrawIndexedIndirectArgs;

use crate::engine_state::gpu::arena::COPY_ALIGNMENT;
use crate::engine_state::gpu::copy_batch::CopyBatch;
use crate::engine_state::gpu::{
    ArenaChannel, ArenaSegment, ArenaSet, GpuBackend, LiveSegments, RenderRecorder,
    RetiredResources, StagingBuffer,
};
use crate::engine_state::rendering::vertex::{
    ChunkRenderInfo, CHUNK_VERTEX_STRIDE, INDEX_STRIDE, INDIRECT_STRIDE, RENDER_INFO_STRIDE,
};
use crate::engine_state::voxels::position::RegionPosition;

use super::LogicalRegion;

/// Bytes of draw table per resident chunk.
pub const DRAW_RECORD_BYTES: u64 = INDIRECT_STRIDE + RENDER_INFO_STRIDE;

/// What the GPU holds for one chunk slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisualRegionChunk {
    /// Indices of the uploaded mesh; empty when nothing is drawn.
    pub index_segment: ArenaSegment,
    /// Interleaved vertices of the uploaded mesh.
    pub vertex_segment: ArenaSegment,
    /// Logical version the segments reflect.
    pub version: u16,
    /// Indices drawn.
    pub index_count: u32,
}

impl VisualRegionChunk {
    /// True when the chunk contributes a draw.
    pub fn is_resident(&self) -> bool {
        !self.index_segment.is_empty()
    }
}

/// How an encode call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
    /// The GPU side now matches the logical side.
    Success,
    /// Some changed chunks did not fit the budget and are still pending.
    Incomplete,
    /// Nothing differed.
    NoChange,
    /// Not even one change fit; nothing was touched.
    NotEnoughSpace,
}

/// Everything an encode call needs from the engine.
pub struct EncodeContext<'a, B: GpuBackend> {
    /// Device creating replacement arena buffers.
    pub backend: &'a B,
    /// Receives staging and compaction copies.
    pub recorder: &'a mut B::Recorder,
    /// The shared arenas.
    pub arenas: &'a mut ArenaSet<B>,
    /// Receives the uploaded bytes.
    pub staging: &'a mut StagingBuffer<B>,
    /// Maximum bytes this call may stage.
    pub budget: u64,
    /// Segments of every other region, moved along when an arena is compacted.
    pub others: &'a mut dyn LiveSegments,
}

/// Result of one [`VisualRegion::encode`].
#[derive(Debug)]
pub struct EncodeResult<B: GpuBackend> {
    /// How the call ended.
    pub status: EncodeStatus,
    /// Bytes written to staging.
    pub staged_bytes: u64,
    /// Chunks whose new geometry was uploaded.
    pub uploaded_chunks: usize,
    /// Chunks whose geometry was dropped.
    pub cleared_chunks: usize,
    /// Superseded table segments and arena buffers; keep until the submission
    /// carrying this call's copies has completed.
    pub retired: RetiredResources<B>,
}

impl<B: GpuBackend> EncodeResult<B> {
    fn unchanged(status: EncodeStatus) -> Self {
        Self {
            status,
            staged_bytes: 0,
            uploaded_chunks: 0,
            cleared_chunks: 0,
            retired: RetiredResources::new(),
        }
    }
}

struct Upload {
    slot: usize,
    index_bytes: u64,
    vertex_bytes: u64,
}

/// GPU mirror of one region.
#[derive(Debug)]
pub struct VisualRegion {
    position: RegionPosition,
    chunks: Vec<VisualRegionChunk>,
    indirect_segment: ArenaSegment,
    render_info_segment: ArenaSegment,
    draw_count: u32,
    table_generations: [u32; 3],
}

impl VisualRegion {
    /// A region with nothing uploaded, mirroring `chunk_count` logical slots.
    pub fn new(position: RegionPosition, chunk_count: usize) -> Self {
        Self {
            position,
            chunks: vec![VisualRegionChunk::default(); chunk_count],
            indirect_segment: ArenaSegment::EMPTY,
            render_info_segment: ArenaSegment::EMPTY,
            draw_count: 0,
            table_generations: [0; 3],
        }
    }

    /// True when the draw table points into arena buffers that were replaced.
    pub fn table_is_stale<B: GpuBackend>(&self, arenas: &ArenaSet<B>) -> bool {
        self.draw_count > 0 && self.table_generations != arenas.draw_generations()
    }

    /// True when an encode would do anything.
    pub fn needs_encode<B: GpuBackend>(&self, logical: &LogicalRegion, arenas: &ArenaSet<B>) -> bool {
        self.table_is_stale(arenas)
            || self
                .chunks
                .iter()
                .zip(logical.chunks())
                .any(|(visual, logical)| visual.version != logical.version)
    }

    /// Uploads changed chunks of `logical` within `ctx.budget` bytes.
    ///
    /// Meshes that were staged are released from `logical`.
    pub fn encode<B: GpuBackend>(
        &mut self,
        logical: &mut LogicalRegion,
        ctx: &mut EncodeContext<'_, B>,
    ) -> EncodeResult<B> {
        debug_assert_eq!(logical.chunks().len(), self.chunks.len());

        let mut clears = Vec::new();
        let mut candidates = Vec::new();
        let mut base = 0;
        for (slot, (visual, source)) in self.chunks.iter().zip(logical.chunks()).enumerate() {
            let changed = visual.version != source.version;
            match (&source.mesh, changed) {
                (None, true) => clears.push(slot),
                (Some(mesh), true) => {
                    candidates.push(Upload {
                        slot,
                        index_bytes: mesh.index_upload_size(),
                        vertex_bytes: mesh.vertex_upload_size(),
                    });
                    if visual.is_resident() {
                        base += DRAW_RECORD_BYTES;
                    }
                }
                (_, false) if visual.is_resident() => base += DRAW_RECORD_BYTES,
                (_, false) => {}
            }
        }

        if base > ctx.budget {
            log::debug!(
                "Region {:?}: draw table of {} bytes exceeds budget {}",
                self.position.0,
                base,
                ctx.budget
            );
            return EncodeResult::unchanged(EncodeStatus::NotEnoughSpace);
        }
        let table_stale = self.table_is_stale(ctx.arenas);
        if clears.is_empty() && candidates.is_empty() && !table_stale {
            return EncodeResult::unchanged(EncodeStatus::NoChange);
        }

        let mut running = 0;
        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let mut cost = candidate.index_bytes + candidate.vertex_bytes;
            if !self.chunks[candidate.slot].is_resident() {
                cost += DRAW_RECORD_BYTES;
            }
            // Slot order is upload order; the rest wait for the next call.
            if base + running + cost > ctx.budget {
                break;
            }
            running += cost;
            accepted.push(candidate);
        }
        if accepted.is_empty() && !candidates.is_empty() {
            return EncodeResult::unchanged(EncodeStatus::NotEnoughSpace);
        }
        let status = if accepted.len() < candidates.len() {
            EncodeStatus::Incomplete
        } else {
            EncodeStatus::Success
        };

        let staged_before = ctx.staging.len();
        let mut retired = RetiredResources::new();

        for &slot in &clears {
            let chunk = &mut self.chunks[slot];
            let index_segment = std::mem::take(&mut chunk.index_segment);
            let vertex_segment = std::mem::take(&mut chunk.vertex_segment);
            chunk.version = logical.chunks()[slot].version;
            chunk.index_count = 0;
            free_segment(ctx.arenas, ArenaChannel::Index, index_segment);
            free_segment(ctx.arenas, ArenaChannel::Vertex, vertex_segment);
            logical.release_mesh(slot);
        }

        let mut pending_index: u64 = accepted.iter().map(|upload| upload.index_bytes).sum();
        let mut pending_vertex: u64 = accepted.iter().map(|upload| upload.vertex_bytes).sum();
        let mut pending_uploads = accepted.len() as u64;
        for upload in &accepted {
            let index_segment = self.replace_segment(
                ctx,
                upload.slot,
                ArenaChannel::Index,
                upload.index_bytes,
                pending_index + pending_uploads * INDEX_STRIDE,
                &mut retired,
            );
            let vertex_segment = self.replace_segment(
                ctx,
                upload.slot,
                ArenaChannel::Vertex,
                upload.vertex_bytes,
                pending_vertex + pending_uploads * CHUNK_VERTEX_STRIDE,
                &mut retired,
            );
            pending_index -= upload.index_bytes;
            pending_vertex -= upload.vertex_bytes;
            pending_uploads -= 1;

            let chunk = &mut self.chunks[upload.slot];
            chunk.index_segment = index_segment;
            chunk.vertex_segment = vertex_segment;
            chunk.version = logical.chunks()[upload.slot].version;
            chunk.index_count = (upload.index_bytes / INDEX_STRIDE) as u32;
        }

        self.rebuild_table(ctx, &mut retired);
        self.stage_table(logical, ctx);

        let mut index_batch = CopyBatch::new();
        for upload in &accepted {
            if let Some(mesh) = &logical.chunks()[upload.slot].mesh {
                let source = ctx.staging.push(mesh.index_bytes());
                index_batch.push(
                    source,
                    self.chunks[upload.slot].index_segment.offset,
                    upload.index_bytes,
                );
            }
        }
        let mut vertex_batch = CopyBatch::new();
        for upload in &accepted {
            if let Some(mesh) = &logical.chunks()[upload.slot].mesh {
                let source = ctx.staging.len();
                mesh.write_interleaved_vertices(ctx.staging.reserve(upload.vertex_bytes));
                vertex_batch.push(
                    source,
                    self.chunks[upload.slot].vertex_segment.offset,
                    upload.vertex_bytes,
                );
            }
        }
        for (channel, batch) in [
            (ArenaChannel::Index, &index_batch),
            (ArenaChannel::Vertex, &vertex_batch),
        ] {
            batch.record(
                &mut *ctx.recorder,
                ctx.staging.buffer(),
                ctx.arenas.get(channel).buffer(),
            );
        }
        for upload in &accepted {
            logical.release_mesh(upload.slot);
        }

        let staged_bytes = ctx.staging.len() - staged_before;
        log::debug!(
            "Region {:?}: {:?}, {} uploaded, {} cleared, {} draws, {} bytes staged",
            self.position.0,
            status,
            accepted.len(),
            clears.len(),
            self.draw_count,
            staged_bytes
        );

        EncodeResult {
            status,
            staged_bytes,
            uploaded_chunks: accepted.len(),
            cleared_chunks: clears.len(),
            retired,
        }
    }

    /// Issues the region's draws; skipped while the table is stale.
    ///
    /// # Returns
    /// True when a draw was issued
    pub fn render<B: GpuBackend, R: RenderRecorder<B::Buffer>>(
        &self,
        arenas: &ArenaSet<B>,
        pass: &mut R,
    ) -> bool {
        if self.draw_count == 0 || self.table_is_stale(arenas) {
            return false;
        }
        pass.multi_draw_indexed_indirect(
            arenas.get(ArenaChannel::Indirect).buffer(),
            self.indirect_segment.offset,
            self.draw_count,
        );
        true
    }

    /// Hands every segment to `retired`, emptying the region.
    pub fn destroy<B: GpuBackend>(&mut self, arenas: &ArenaSet<B>, retired: &mut RetiredResources<B>) {
        let mut retire = |channel: ArenaChannel, segment: &mut ArenaSegment| {
            retired.retire_segment(channel, std::mem::take(segment), arenas.get(channel).generation());
        };
        for chunk in &mut self.chunks {
            retire(ArenaChannel::Index, &mut chunk.index_segment);
            retire(ArenaChannel::Vertex, &mut chunk.vertex_segment);
            chunk.index_count = 0;
        }
        retire(ArenaChannel::Indirect, &mut self.indirect_segment);
        retire(ArenaChannel::RenderInfo, &mut self.render_info_segment);
        self.draw_count = 0;
    }

    /// The region's coordinate.
    pub fn position(&self) -> RegionPosition {
        self.position
    }

    /// Per-slot GPU state.
    pub fn chunks(&self) -> &[VisualRegionChunk] {
        &self.chunks
    }

    /// Chunks drawn by the current table.
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// Where the draw table's indirect records live.
    pub fn indirect_segment(&self) -> ArenaSegment {
        self.indirect_segment
    }

    /// Where the draw table's render-info records live.
    pub fn render_info_segment(&self) -> ArenaSegment {
        self.render_info_segment
    }

    /// Frees a slot's segment of `channel` unless its length is already
    /// `length`, then allocates a new one, compacting the arena if needed.
    ///
    /// `reserve` is what the rest of this encode still needs from the arena,
    /// this allocation included.
    fn replace_segment<B: GpuBackend>(
        &mut self,
        ctx: &mut EncodeContext<'_, B>,
        slot: usize,
        channel: ArenaChannel,
        length: u64,
        reserve: u64,
        retired: &mut RetiredResources<B>,
    ) -> ArenaSegment {
        let chunk = &mut self.chunks[slot];
        let current = match channel {
            ArenaChannel::Index => &mut chunk.index_segment,
            _ => &mut chunk.vertex_segment,
        };
        if current.length == length {
            return *current;
        }
        let previous = std::mem::take(current);
        free_segment(ctx.arenas, channel, previous);
        self.allocate(ctx, channel, length, reserve, retired)
    }

    fn allocate<B: GpuBackend>(
        &mut self,
        ctx: &mut EncodeContext<'_, B>,
        channel: ArenaChannel,
        length: u64,
        reserve: u64,
        retired: &mut RetiredResources<B>,
    ) -> ArenaSegment {
        let alignment = segment_alignment(channel);
        if let Some(segment) = ctx.arenas.get_mut(channel).try_alloc(length, alignment) {
            return segment;
        }

        let arena = ctx.arenas.get_mut(channel);
        let min_capacity = arena.bytes_used() + reserve;
        let mut live = WithOthers {
            region: self,
            others: &mut *ctx.others,
        };
        let old_buffer =
            arena.resize_with_compaction(ctx.backend, &mut *ctx.recorder, min_capacity, &mut live);
        retired.retire_buffer(old_buffer);

        match arena.try_alloc(length, alignment) {
            Some(segment) => segment,
            None => unreachable!(
                "{} has no room for {} bytes right after growing to {}",
                channel.label(),
                length,
                arena.byte_capacity()
            ),
        }
    }

    /// Retires the old draw table and allocates one for the resident chunks.
    fn rebuild_table<B: GpuBackend>(
        &mut self,
        ctx: &mut EncodeContext<'_, B>,
        retired: &mut RetiredResources<B>,
    ) {
        for channel in [ArenaChannel::Indirect, ArenaChannel::RenderInfo] {
            let segment = match channel {
                ArenaChannel::Indirect => &mut self.indirect_segment,
                _ => &mut self.render_info_segment,
            };
            let generation = ctx.arenas.get(channel).generation();
            retired.retire_segment(channel, std::mem::take(segment), generation);
        }

        let draws = self.chunks.iter().filter(|chunk| chunk.is_resident()).count() as u64;
        self.draw_count = draws as u32;
        if draws == 0 {
            return;
        }
        let indirect_bytes = draws * INDIRECT_STRIDE;
        self.indirect_segment = self.allocate(
            ctx,
            ArenaChannel::Indirect,
            indirect_bytes,
            indirect_bytes + segment_alignment(ArenaChannel::Indirect),
            retired,
        );
        let render_info_bytes = draws * RENDER_INFO_STRIDE;
        self.render_info_segment = self.allocate(
            ctx,
            ArenaChannel::RenderInfo,
            render_info_bytes,
            render_info_bytes + segment_alignment(ArenaChannel::RenderInfo),
            retired,
        );
    }

    /// Writes the draw table to staging and records its two copies.
    fn stage_table<B: GpuBackend>(&mut self, logical: &LogicalRegion, ctx: &mut EncodeContext<'_, B>) {
        self.table_generations = ctx.arenas.draw_generations();
        if self.draw_count == 0 {
            return;
        }

        let first_instance = (self.render_info_segment.offset / RENDER_INFO_STRIDE) as u32;
        let indirect_source = ctx.staging.len();
        {
            let records = ctx.staging.reserve(self.indirect_segment.length);
            let resident = self.chunks.iter().filter(|chunk| chunk.is_resident());
            for (draw, (record, chunk)) in records
                .chunks_exact_mut(INDIRECT_STRIDE as usize)
                .zip(resident)
                .enumerate()
            {
                let args = DrawIndexedIndirectArgs {
                    index_count: chunk.index_count,
                    instance_count: 1,
                    first_index: (chunk.index_segment.offset / INDEX_STRIDE) as u32,
                    base_vertex: (chunk.vertex_segment.offset / CHUNK_VERTEX_STRIDE) as i32,
                    first_instance: first_instance + draw as u32,
                };
                record.copy_from_slice(args.as_bytes());
            }
        }

        let render_info_source = ctx.staging.len();
        {
            let records = ctx.staging.reserve(self.render_info_segment.length);
            let resident = self
                .chunks
                .iter()
                .zip(logical.chunks())
                .filter(|(chunk, _)| chunk.is_resident());
            for (record, (_, source)) in records
                .chunks_exact_mut(RENDER_INFO_STRIDE as usize)
                .zip(resident)
            {
                let origin = source.world_position.origin_block().0;
                let info = ChunkRenderInfo {
                    translation: [origin.x as f32, origin.y as f32, origin.z as f32, 1.0],
                };
                record.copy_from_slice(bytemuck::bytes_of(&info));
            }
        }

        for (channel, source, segment) in [
            (ArenaChannel::Indirect, indirect_source, self.indirect_segment),
            (ArenaChannel::RenderInfo, render_info_source, self.render_info_segment),
        ] {
            let mut batch = CopyBatch::new();
            batch.push(source, segment.offset, segment.length);
            batch.record(
                &mut *ctx.recorder,
                ctx.staging.buffer(),
                ctx.arenas.get(channel).buffer(),
            );
        }
    }
}

impl LiveSegments for VisualRegion {
    fn for_each_live_segment(
        &mut self,
        channel: ArenaChannel,
        visit: &mut dyn FnMut(&mut ArenaSegment),
    ) {
        match channel {
            ArenaChannel::Index => self
                .chunks
                .iter_mut()
                .for_each(|chunk| visit(&mut chunk.index_segment)),
            ArenaChannel::Vertex => self
                .chunks
                .iter_mut()
                .for_each(|chunk| visit(&mut chunk.vertex_segment)),
            ArenaChannel::Indirect => visit(&mut self.indirect_segment),
            ArenaChannel::RenderInfo => visit(&mut self.render_info_segment),
        }
    }
}

impl LiveSegments for HashMap<RegionPosition, VisualRegion> {
    fn for_each_live_segment(
        &mut self,
        channel: ArenaChannel,
        visit: &mut dyn FnMut(&mut ArenaSegment),
    ) {
        for region in self.values_mut() {
            region.for_each_live_segment(channel, visit);
        }
    }
}

struct WithOthers<'a, 'b> {
    region: &'a mut VisualRegion,
    others: &'a mut (dyn LiveSegments + 'b),
}

impl LiveSegments for WithOthers<'_, '_> {
    fn for_each_live_segment(
        &mut self,
        channel: ArenaChannel,
        visit: &mut dyn FnMut(&mut ArenaSegment),
    ) {
        self.region.for_each_live_segment(channel, visit);
        self.others.for_each_live_segment(channel, visit);
    }
}

fn segment_alignment(channel: ArenaChannel) -> u64 {
    match channel {
        ArenaChannel::Index => INDEX_STRIDE,
        ArenaChannel::Vertex => CHUNK_VERTEX_STRIDE,
        ArenaChannel::Indirect => COPY_ALIGNMENT,
        ArenaChannel::RenderInfo => RENDER_INFO_STRIDE,
    }
}

fn free_segment<B: GpuBackend>(arenas: &mut ArenaSet<B>, channel: ArenaChannel, segment: ArenaSegment) {
    if !segment.is_empty() {
        arenas.get_mut(channel).free(segment);
    }
}

#[cfg(test)]
#[path = "visual_region_test.rs"]
mod visual_region_test;
