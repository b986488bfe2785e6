//! # Voxels Module
//!
//! Block data as the streaming pipeline sees it: block ids and their visuals,
//! dense chunks, halo-padded mesher input, coordinate spaces, and the world seam
//! ([`world::BlockSource`] plus [`events::ChunkEvent`]).

pub mod block;
pub mod chunk;
pub mod events;
pub mod position;
pub mod world;
