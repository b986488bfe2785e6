//! # Regions
//!
//! Chunks are grouped into fixed-size cuboid regions, the unit of remeshing and
//! of GPU upload. Each region exists twice:
//!
//! * a [`LogicalRegion`] on the CPU, caching one mesh and one version per chunk,
//!   shared between the scheduler and the meshing workers
//! * a [`VisualRegion`] on the render thread, mirroring what the GPU holds and
//!   uploading the difference
//!
//! The [`RegionUpdateScheduler`] owns the logical side and reports region
//! lifecycle changes as [`RegionEvent`]s; the engine keeps the visual side in step
//! with them.

use crate::core::MtResource;
use crate::engine_state::voxels::position::RegionPosition;

pub mod logical_region;
pub mod scheduler;
pub mod visual_region;

pub use logical_region::{LogicalRegion, LogicalRegionChunk};
pub use scheduler::RegionUpdateScheduler;
pub use visual_region::{EncodeContext, EncodeResult, EncodeStatus, VisualRegion};

/// A logical region shared between the scheduler, the workers and the uploader.
pub type RegionHandle = MtResource<LogicalRegion>;

/// Region lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionEvent {
    /// The first chunk of a region arrived.
    Added(RegionPosition),
    /// A region finished remeshing at least one chunk.
    Updated(RegionPosition),
    /// The last chunk of a region left.
    Removed(RegionPosition),
}

impl RegionEvent {
    /// The region the event is about.
    pub fn position(&self) -> RegionPosition {
        match self {
            RegionEvent::Added(position)
            | RegionEvent::Updated(position)
            | RegionEvent::Removed(position) => *position,
        }
    }
}
