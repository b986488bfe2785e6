//! # Task Management System
//!
//! A fixed pool of worker threads that remesh regions off the render thread.
//!
//! ## Architecture Overview
//!
//! - `MeshingWorkerPool`: owns the workers, the shared task queue and the result channel
//! - `RegionMeshTask`: one region to remesh, see [`task`]
//! - `RegionMeshOutcome`: what a worker reports back
//!
//! Tasks go into one `Mutex<VecDeque>` guarded by a `Condvar`; idle workers sleep
//! on the condvar and the first one awake takes the next task. Results come back
//! through an `mpsc` channel drained by `process_completed_tasks()` on the
//! scheduler thread.
//!
//! Every worker owns its scratch [`BlockMemory`] and its [`VoxelMesher`] handle,
//! so meshing allocates nothing per task beyond the meshes themselves.
//!
//! ## Task Lifecycle
//! 1. Tasks are published via `MeshingWorkerPool::publish_task()`; a region
//!    already queued or in flight is not queued twice
//! 2. A worker pops the task and takes the region's lock without blocking;
//!    busy regions are reported back untouched
//! 3. Results are collected on the scheduler thread in `process_completed_tasks()`
//! 4. `shutdown()` lets workers drain the queue, then joins them within a timeout
//!
//! ## Example Usage
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use voxel_streaming::engine_state::task_management::MeshingWorkerPool;
//! # fn demo(world: Arc<dyn voxel_streaming::engine_state::voxels::world::BlockSource>,
//! #         mesher: voxel_streaming::engine_state::rendering::meshing::VoxelMesher,
//! #         position: voxel_streaming::engine_state::voxels::position::RegionPosition,
//! #         region: voxel_streaming::engine_state::regions::RegionHandle) {
//! let mut pool = MeshingWorkerPool::new(4, world, mesher, 2);
//! pool.publish_task(position, region);
//!
//! // In the frame loop:
//! for outcome in pool.process_completed_tasks() {
//!     log::debug!("{:?}", outcome);
//! }
//!
//! pool.shutdown(Duration::from_secs(2));
//! # }
//! ```

pub mod task;

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use web_time::Instant;

use crate::engine_state::regions::RegionHandle;
use crate::engine_state::rendering::meshing::VoxelMesher;
use crate::engine_state::voxels::chunk::BlockMemory;
use crate::engine_state::voxels::position::RegionPosition;
use crate::engine_state::voxels::world::BlockSource;

pub use task::{RegionMeshOutcome, RegionMeshStatus, RegionMeshTask};

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<RegionMeshTask>,
    shutting_down: bool,
}

/// The queue every worker pulls from.
#[derive(Default)]
struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    /// Blocks until a task is available or the queue is shut down and empty.
    fn next_task(&self) -> Option<RegionMeshTask> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.shutting_down {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Manages a pool of meshing threads.
///
/// # Implementation Notes
/// - Must be driven from one thread (the scheduler's)
/// - Dropping the pool signals shutdown without waiting
pub struct MeshingWorkerPool {
    queue: Arc<TaskQueue>,
    result_receiver: Receiver<RegionMeshOutcome>,
    workers: Vec<JoinHandle<()>>,
    in_flight: HashSet<RegionPosition>,
}

impl MeshingWorkerPool {
    /// Spawns `num_workers` meshing threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of threads; at least one is spawned
    /// * `world` - Block source shared by all workers
    /// * `mesher` - Cloned into every worker
    /// * `halo` - Halo of each worker's scratch grid
    pub fn new(
        num_workers: usize,
        world: Arc<dyn BlockSource>,
        mesher: VoxelMesher,
        halo: usize,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let queue = Arc::new(TaskQueue::default());
        let (result_sender, result_receiver) = channel();

        log::info!(
            "Starting {} meshing workers (available parallelism: {:?})",
            num_workers,
            thread::available_parallelism()
        );

        let workers = (0..num_workers)
            .map(|index| {
                let queue = queue.clone();
                let world = world.clone();
                let mesher = mesher.clone();
                let results: Sender<RegionMeshOutcome> = result_sender.clone();
                thread::Builder::new()
                    .name(format!("meshing-worker-{index}"))
                    .spawn(move || {
                        let mut scratch = BlockMemory::new(halo);
                        while let Some(task) = queue.next_task() {
                            let outcome = task.process(world.as_ref(), &mut scratch, &mesher);
                            if results.send(outcome).is_err() {
                                break;
                            }
                        }
                        log::debug!("Meshing worker {index} stopped");
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(error) => {
                    log::error!("Failed to spawn meshing worker: {error}");
                    None
                }
            })
            .collect();

        Self {
            queue,
            result_receiver,
            workers,
            in_flight: HashSet::new(),
        }
    }

    /// Queues a region for remeshing.
    ///
    /// # Returns
    /// `false` when the region is already queued or being processed
    pub fn publish_task(&mut self, position: RegionPosition, region: RegionHandle) -> bool {
        if !self.in_flight.insert(position) {
            return false;
        }
        let mut state = self
            .queue
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.tasks.push_back(RegionMeshTask { position, region });
        drop(state);
        self.queue.available.notify_one();
        true
    }

    /// Collects every finished task without blocking.
    pub fn process_completed_tasks(&mut self) -> Vec<RegionMeshOutcome> {
        let outcomes: Vec<_> = self.result_receiver.try_iter().collect();
        for outcome in &outcomes {
            self.in_flight.remove(&outcome.position);
        }
        outcomes
    }

    /// Regions queued or being processed.
    pub fn tasks_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// True when `position` is queued or being processed.
    pub fn is_in_flight(&self, position: RegionPosition) -> bool {
        self.in_flight.contains(&position)
    }

    /// Running worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Lets the workers finish the queued tasks, then joins them.
    ///
    /// # Returns
    /// True when every worker exited within `timeout`; stragglers are detached
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.signal_shutdown();
        let deadline = Instant::now() + timeout;
        while self.workers.iter().any(|worker| !worker.is_finished()) && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }

        let mut clean = true;
        for worker in self.workers.drain(..) {
            if worker.is_finished() {
                if worker.join().is_err() {
                    log::error!("A meshing worker panicked");
                    clean = false;
                }
            } else {
                clean = false;
            }
        }
        if !clean {
            log::warn!("Meshing workers did not stop cleanly within {:?}", timeout);
        }
        self.in_flight.clear();
        clean
    }

    fn signal_shutdown(&self) {
        self.queue
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutting_down = true;
        self.queue.available.notify_all();
    }
}

impl Drop for MeshingWorkerPool {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
#[path = "worker_pool_test.rs"]
mod worker_pool_test;
