use crate::{MetricsRegistry, Operation, StrategyKind};
use codeatlas_core::Result;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between consecutive groups
    pub delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
pub struct BatchingStrategy {
    options: BatchOptions,
}

impl BatchingStrategy {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Run every operation in groups of `batch_size`. One slot per input,
    /// in input order; a failure never aborts the remaining groups.
    pub(crate) async fn run_all<'a, T>(
        &self,
        ops: Vec<Operation<'a, T>>,
        metrics: &MetricsRegistry,
    ) -> Vec<Result<T>> {
        let size = self.options.batch_size.max(1);
        let groups = ops.len().div_ceil(size);
        let mut results = Vec::with_capacity(ops.len());

        for (index, group) in ops.chunks(size).enumerate() {
            let started = Instant::now();
            let outcomes = join_all(group.iter().map(|op| op())).await;
            let latency = started.elapsed();
            for outcome in &outcomes {
                metrics.record(StrategyKind::Batching, latency, outcome.is_ok());
            }
            debug!(
                "Batch {}/{} finished: {} operations in {:?}",
                index + 1,
                groups,
                outcomes.len(),
                latency
            );
            results.extend(outcomes);

            if index + 1 < groups && !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }
        }
        results
    }

    pub(crate) async fn run<'a, T>(&self, op: Operation<'a, T>) -> Result<T> {
        op().await
    }
}
