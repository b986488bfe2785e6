use std::sync::Arc;

use crate::engine_state::memory::{GrowableByteBuffer, PooledAllocator};
use crate::engine_state::rendering::vertex::{
    ChunkVertex, GeometryVertex, PaintVertex, CHUNK_VERTEX_STRIDE, INDEX_STRIDE,
};

/// Geometry of one chunk as produced by the mesher.
///
/// Three byte streams, all drawn from the pool and returned to it on drop:
/// `u32` indices, [`GeometryVertex`] records, and [`PaintVertex`] records
/// parallel to the geometry stream.
#[derive(Debug)]
pub struct MeshResult {
    indices: GrowableByteBuffer,
    geometry: GrowableByteBuffer,
    paint: GrowableByteBuffer,
}

impl MeshResult {
    /// An empty mesh whose buffers will draw from `pool`.
    pub fn new(pool: Arc<PooledAllocator>) -> Self {
        Self {
            indices: GrowableByteBuffer::new(pool.clone()),
            geometry: GrowableByteBuffer::new(pool.clone()),
            paint: GrowableByteBuffer::new(pool),
        }
    }

    /// Reserves room for `faces` more quads in every stream.
    pub fn prepare_faces(&mut self, faces: usize) {
        self.indices.prepare_capacity(faces * 6 * INDEX_STRIDE as usize);
        self.geometry
            .prepare_capacity(faces * 4 * std::mem::size_of::<GeometryVertex>());
        self.paint
            .prepare_capacity(faces * 4 * std::mem::size_of::<PaintVertex>());
    }

    /// Appends one corner.
    pub fn push_vertex(&mut self, geometry: GeometryVertex, paint: PaintVertex) {
        self.geometry.append(geometry);
        self.paint.append(paint);
    }

    /// Appends indices relative to the start of the mesh.
    pub fn push_indices(&mut self, indices: &[u32]) {
        self.indices.append_range(indices);
    }

    /// Releases spare capacity in all three streams.
    pub fn trim(&mut self) {
        self.indices.trim();
        self.geometry.trim();
        self.paint.trim();
    }

    /// True when the chunk has nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of indices.
    pub fn index_count(&self) -> u32 {
        (self.indices.len() / INDEX_STRIDE as usize) as u32
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        (self.geometry.len() / std::mem::size_of::<GeometryVertex>()) as u32
    }

    /// Raw index bytes.
    pub fn index_bytes(&self) -> &[u8] {
        self.indices.as_bytes()
    }

    /// Raw geometry vertex bytes.
    pub fn geometry_bytes(&self) -> &[u8] {
        self.geometry.as_bytes()
    }

    /// Raw paint vertex bytes.
    pub fn paint_bytes(&self) -> &[u8] {
        self.paint.as_bytes()
    }

    /// Byte size of the index stream once uploaded.
    pub fn index_upload_size(&self) -> u64 {
        self.indices.len() as u64
    }

    /// Byte size of the interleaved vertex stream once uploaded.
    pub fn vertex_upload_size(&self) -> u64 {
        self.vertex_count() as u64 * CHUNK_VERTEX_STRIDE
    }

    /// Total CPU bytes held by the three streams.
    pub fn byte_size(&self) -> usize {
        self.indices.len() + self.geometry.len() + self.paint.len()
    }

    /// Writes the geometry and paint streams interleaved into `out`.
    ///
    /// # Panics
    /// When `out` is not exactly [`MeshResult::vertex_upload_size`] bytes long.
    pub fn write_interleaved_vertices(&self, out: &mut [u8]) {
        assert_eq!(out.len() as u64, self.vertex_upload_size());
        let geometry = self
            .geometry
            .as_bytes()
            .chunks_exact(std::mem::size_of::<GeometryVertex>());
        let paint = self
            .paint
            .as_bytes()
            .chunks_exact(std::mem::size_of::<PaintVertex>());
        let records = out.chunks_exact_mut(CHUNK_VERTEX_STRIDE as usize);
        for ((record, geometry), paint) in records.zip(geometry).zip(paint) {
            let vertex = ChunkVertex {
                geometry: bytemuck::pod_read_unaligned(geometry),
                paint: bytemuck::pod_read_unaligned(paint),
            };
            record.copy_from_slice(bytemuck::bytes_of(&vertex));
        }
    }
}
