//! # Region Meshing Tasks
//!
//! The unit of background work is one region: a worker takes the region's write
//! lock without blocking, remeshes every dirty slot with its own scratch grid and
//! mesher, and reports back what happened.
//!
//! ## Task Lifecycle
//! 1. The scheduler publishes a [`RegionMeshTask`] via `MeshingWorkerPool::publish_task()`
//! 2. A worker pops it from the shared queue and calls [`RegionMeshTask::process`]
//! 3. The [`RegionMeshOutcome`] travels back over the result channel
//! 4. The scheduler turns outcomes into region events and re-queues busy or
//!    still-dirty regions on its next pass

use crate::engine_state::regions::RegionHandle;
use crate::engine_state::rendering::meshing::VoxelMesher;
use crate::engine_state::voxels::chunk::BlockMemory;
use crate::engine_state::voxels::position::RegionPosition;
use crate::engine_state::voxels::world::BlockSource;

/// Remesh the dirty slots of one region.
pub struct RegionMeshTask {
    /// Region coordinate, reported back with the outcome.
    pub position: RegionPosition,
    /// The region itself.
    pub region: RegionHandle,
}

/// What a worker did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMeshStatus {
    /// At least one slot reached a new version.
    Updated,
    /// Nothing needed doing.
    Idle,
    /// Another thread held the region; nothing was touched.
    Busy,
}

/// Result of one [`RegionMeshTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMeshOutcome {
    /// Region coordinate.
    pub position: RegionPosition,
    /// What happened.
    pub status: RegionMeshStatus,
    /// Slots still waiting, for example on a partially loaded neighborhood.
    pub still_dirty: bool,
}

impl RegionMeshTask {
    /// Runs the task on the calling thread.
    ///
    /// # Arguments
    /// * `world` - Source of block neighborhoods
    /// * `scratch` - The worker's reusable grid
    /// * `mesher` - The worker's mesher
    pub fn process(
        &self,
        world: &dyn BlockSource,
        scratch: &mut BlockMemory,
        mesher: &VoxelMesher,
    ) -> RegionMeshOutcome {
        let Some(mut region) = self.region.try_get_mut() else {
            return RegionMeshOutcome {
                position: self.position,
                status: RegionMeshStatus::Busy,
                still_dirty: true,
            };
        };

        let status = if region.update(world, scratch, mesher) {
            RegionMeshStatus::Updated
        } else {
            RegionMeshStatus::Idle
        };
        RegionMeshOutcome {
            position: self.position,
            status,
            still_dirty: region.is_dirty(),
        }
    }
}
