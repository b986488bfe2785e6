//! # Streaming Configuration
//!
//! Every tunable of the meshing and streaming pipeline lives in [`StreamingConfig`].
//! The struct deserializes from JSON with per-field defaults, so a configuration file
//! only needs to name the options it overrides:
//!
//! ```json
//! { "region_size": [8, 4, 8], "staging_budget_bytes": 8388608 }
//! ```
//!
//! Values are checked once with [`StreamingConfig::validate`] before the engine is built;
//! nothing downstream re-validates them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`StreamingConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("failed to parse streaming config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A size-like option was zero.
    #[error("config option `{0}` must be greater than zero")]
    Zero(&'static str),

    /// The halo must be at least one block so every face has a neighbor to test.
    #[error("halo margin must be at least 1 block, got {0}")]
    HaloTooSmall(u32),

    /// Arena capacities are rounded with a mask.
    #[error("arena granularity must be a power of two, got {0}")]
    GranularityNotPowerOfTwo(u64),
}

/// Tunables for the pooled allocator, the region layout, the update scheduler and
/// the GPU arenas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks per region along X, Y and Z.
    pub region_size: [u32; 3],
    /// Extra blocks fetched on every side of a chunk before meshing.
    pub halo: u32,
    /// Wall-clock budget for remeshing per scheduler tick, in milliseconds.
    pub frame_budget_ms: u64,
    /// Upper bound on staging bytes written by all encodes of one frame.
    pub staging_budget_bytes: u64,
    /// Arena capacities are rounded up to a multiple of this value.
    pub arena_granularity_bytes: u64,
    /// Capacity each arena starts with.
    pub initial_arena_bytes: u64,
    /// Width of a pooled allocator size class.
    pub pool_class_width: usize,
    /// Number of pooled size classes; larger requests bypass the pool.
    pub pool_max_classes: usize,
    /// Free blocks kept per size class before returning memory to the heap.
    pub pool_retained_per_class: usize,
    /// Background meshing threads. Zero meshes inline on the scheduler thread.
    pub worker_threads: usize,
    /// How long shutdown waits for workers and in-flight submissions.
    pub shutdown_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            region_size: [4, 3, 4],
            halo: 2,
            frame_budget_ms: 10,
            staging_budget_bytes: 4 * 1024 * 1024,
            arena_granularity_bytes: 64 * 1024,
            initial_arena_bytes: 1024 * 1024,
            pool_class_width: 1024,
            pool_max_classes: 64,
            pool_retained_per_class: 32,
            worker_threads: 0,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl StreamingConfig {
    /// Parses a configuration from JSON and validates it.
    ///
    /// # Arguments
    /// * `json` - A JSON object; missing fields take their default value
    ///
    /// # Returns
    /// The validated configuration, or the first problem found
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: StreamingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region_size.iter().any(|&axis| axis == 0) {
            return Err(ConfigError::Zero("region_size"));
        }
        if self.halo < 1 {
            return Err(ConfigError::HaloTooSmall(self.halo));
        }
        if self.staging_budget_bytes == 0 {
            return Err(ConfigError::Zero("staging_budget_bytes"));
        }
        if self.pool_class_width == 0 {
            return Err(ConfigError::Zero("pool_class_width"));
        }
        if self.pool_max_classes == 0 {
            return Err(ConfigError::Zero("pool_max_classes"));
        }
        if !self.arena_granularity_bytes.is_power_of_two() {
            return Err(ConfigError::GranularityNotPowerOfTwo(
                self.arena_granularity_bytes,
            ));
        }
        Ok(())
    }

    /// Number of chunk slots in one region.
    pub fn chunks_per_region(&self) -> usize {
        self.region_size.iter().map(|&axis| axis as usize).product()
    }

    /// The per-tick remeshing budget as a [`std::time::Duration`].
    pub fn frame_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_budget_ms)
    }

    /// The shutdown wait as a [`std::time::Duration`].
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
