//! Rendering-side data for the voxel pipeline.
//!
//! `meshing` turns block grids into chunk meshes; `vertex` defines the records
//! those meshes and the per-draw tables are stored as on the GPU.

pub mod meshing;
pub mod vertex;

pub use vertex::{ChunkRenderInfo, ChunkVertex, GeometryVertex, PaintVertex};
