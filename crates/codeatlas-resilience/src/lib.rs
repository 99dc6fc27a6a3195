//! CodeAtlas execution strategies
//!
//! Provides:
//! - Retry with multiplicative backoff and an optional retryability predicate
//! - Circuit breaking (closed / open / half-open with a single trial call)
//! - Sliding-window throttling
//! - Adaptive fast/slow mode tracking
//! - Memoization with TTL and FIFO eviction
//! - Fixed-size batching that captures per-operation failures
//! - Composition of the above and a context-keyed selector

pub mod adaptive;
pub mod batch;
pub mod circuit_breaker;
pub mod memoize;
pub mod metrics;
pub mod operation;
pub mod retry;
pub mod selector;
pub mod strategy;
pub mod throttle;

pub use adaptive::*;
pub use batch::*;
pub use circuit_breaker::*;
pub use memoize::*;
pub use metrics::*;
pub use operation::*;
pub use retry::*;
pub use selector::*;
pub use strategy::*;
pub use throttle::*;
