//! CodeAtlas analysis scheduler
//!
//! Provides:
//! - Discovery, change detection and bounded-concurrency batch processing
//! - Per-file and whole-run deadlines with partial results on expiry
//! - Memory-pressure checks between batches
//! - Snapshot aggregation: structure, complexity, quality and performance

pub mod options;
pub mod progress;
pub mod scheduler;
pub mod snapshot;

pub use options::*;
pub use progress::*;
pub use scheduler::*;
pub use snapshot::*;
