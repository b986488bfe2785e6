//! # Core Module
//!
//! Sharing primitives used across the pipeline.
//!
//! ## Key Components
//! - `MtResource`: thread-safe shared resource with read-write locking and a
//!   non-blocking exclusive path, used for logical regions
//! - `RefCounted` / `TrackedHandle`: explicit reference counting with a
//!   deterministic disposal point, used for world chunk data

pub mod mt_resource;
pub mod tracked;

pub use mt_resource::MtResource;
pub use tracked::{HandleError, RefCounted, TrackedHandle, TrackedRef};
