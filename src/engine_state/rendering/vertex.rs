//! Vertex and per-draw record formats shared by the mesher, the uploader and the
//! shader pipeline.
//!
//! The mesher writes two parallel vertex streams per chunk: [`GeometryVertex`]
//! (where) and [`PaintVertex`] (how it looks). When a chunk is staged for upload the
//! streams are interleaved into [`ChunkVertex`] records so one base-vertex offset
//! addresses both.

use bytemuck::{Pod, Zeroable};

/// Position and normal of one quad corner.
///
/// # Memory Layout
/// - Position: 3x u8, chunk-local corner coordinate in `0..=16`, plus one pad byte
/// - Normal: 3x i8 snorm, plus one pad byte
///
/// Total size: 8 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GeometryVertex {
    /// Chunk-local corner position; the fourth byte is zero.
    pub position: [u8; 4],
    /// Quantized unit normal (`±127` on one axis); the fourth byte is zero.
    pub normal: [i8; 4],
}

/// Texturing attributes of one quad corner.
///
/// Total size: 8 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct PaintVertex {
    /// Packed texture animation descriptor, see `TextureAnimation::descriptor`,
    /// with the quad corner (`0..4`) in bits 16..18.
    pub animation: u32,
    /// Texture region index.
    pub texture_region: u32,
}

/// Interleaved vertex record as stored in the vertex arena.
///
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkVertex {
    /// Geometry half.
    pub geometry: GeometryVertex,
    /// Paint half.
    pub paint: PaintVertex,
}

/// Per-draw record bound as an instance-rate vertex stream; `first_instance` of
/// each indirect draw selects the chunk's record.
///
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ChunkRenderInfo {
    /// World-space block coordinate of the chunk origin; `w` is 1.
    pub translation: [f32; 4],
}

/// Byte size of one [`ChunkVertex`].
pub const CHUNK_VERTEX_STRIDE: u64 = std::mem::size_of::<ChunkVertex>() as u64;
/// Byte size of one [`ChunkRenderInfo`].
pub const RENDER_INFO_STRIDE: u64 = std::mem::size_of::<ChunkRenderInfo>() as u64;
/// Byte size of one index.
pub const INDEX_STRIDE: u64 = std::mem::size_of::<u32>() as u64;
/// Byte size of one indexed-indirect draw record.
pub const INDIRECT_STRIDE: u64 = std::mem::size_of::<wgpu::util::DrawIndexedIndirectArgs>() as u64;

impl ChunkVertex {
    /// Vertex buffer layout of the interleaved vertex arena.
    ///
    /// # Shader Attributes
    /// - `location = 0`: position (vec4<u32> from Uint8x4)
    /// - `location = 1`: normal (vec4<f32> from Snorm8x4)
    /// - `location = 2`: animation (u32)
    /// - `location = 3`: texture_region (u32)
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: CHUNK_VERTEX_STRIDE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Uint8x4,
                },
                wgpu::VertexAttribute {
                    offset: 4,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Snorm8x4,
                },
                wgpu::VertexAttribute {
                    offset: 8,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Uint32,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Uint32,
                },
            ],
        }
    }
}

impl ChunkRenderInfo {
    /// Instance-rate layout of the render-info arena.
    ///
    /// # Shader Attributes
    /// - `location = 4`: translation (vec4<f32>)
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: RENDER_INFO_STRIDE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 4,
                format: wgpu::VertexFormat::Float32x4,
            }],
        }
    }
}
