//! CodeAtlas incremental cache
//!
//! Provides:
//! - Content-hash validated per-file cache with FIFO capacity and optional TTL
//! - Reverse dependency index with transitive, cycle-safe invalidation
//! - Versioned JSON persistence through a `DurableStorage` backend
//! - Memory-pressure sampling and reclamation of cache-like components

pub mod cache;
pub mod invalidation;
pub mod memory;
pub mod storage;

pub use cache::*;
pub use invalidation::*;
pub use memory::*;
pub use storage::*;
