// ABOUTME: ExecutionStrategy wraps every strategy layer behind one execute/execute_with API.
// ABOUTME: Composite strategies nest layers so the first layer runs outermost.

use crate::{
    AdaptiveOptions, AdaptiveStrategy, BatchOptions, BatchingStrategy, CircuitBreakerOptions,
    CircuitBreakerStrategy, MemoizeOptions, MemoizingStrategy, MetricsRegistry, Operation,
    RetryOptions, RetryStrategy, StrategyKind, ThrottleOptions, ThrottleStrategy,
};
use codeatlas_core::{CodeAtlasError, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

/// Memoization key used by [`ExecutionStrategy::execute`] (the serialized unit value).
const UNIT_KEY: &str = "null";

/// The closed set of strategy behaviours.
#[derive(Debug, Clone)]
pub enum StrategyLayer {
    Passthrough,
    Adaptive(Arc<AdaptiveStrategy>),
    Memoizing(Arc<MemoizingStrategy>),
    Batching(Arc<BatchingStrategy>),
    Retry(Arc<RetryStrategy>),
    CircuitBreaker(Arc<CircuitBreakerStrategy>),
    Throttle(Arc<ThrottleStrategy>),
    Composite(Arc<[ExecutionStrategy]>),
}

/// A strategy layer bound to the registry that records its executions.
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    layer: StrategyLayer,
    metrics: Arc<MetricsRegistry>,
}

impl ExecutionStrategy {
    fn from_layer(layer: StrategyLayer, metrics: Arc<MetricsRegistry>) -> Self {
        Self { layer, metrics }
    }

    pub fn passthrough(metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(StrategyLayer::Passthrough, metrics)
    }

    pub fn adaptive(options: AdaptiveOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::Adaptive(Arc::new(AdaptiveStrategy::new(options))),
            metrics,
        )
    }

    pub fn memoizing(options: MemoizeOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::Memoizing(Arc::new(MemoizingStrategy::new(options))),
            metrics,
        )
    }

    pub fn batching(options: BatchOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::Batching(Arc::new(BatchingStrategy::new(options))),
            metrics,
        )
    }

    pub fn retry(options: RetryOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::Retry(Arc::new(RetryStrategy::new(options))),
            metrics,
        )
    }

    pub fn circuit_breaker(options: CircuitBreakerOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::CircuitBreaker(Arc::new(CircuitBreakerStrategy::new(options))),
            metrics,
        )
    }

    pub fn throttle(options: ThrottleOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(
            StrategyLayer::Throttle(Arc::new(ThrottleStrategy::new(options))),
            metrics,
        )
    }

    /// `layers[0]` wraps everything and runs first; the last layer wraps
    /// the raw operation.
    pub fn compose(layers: Vec<ExecutionStrategy>, metrics: Arc<MetricsRegistry>) -> Self {
        Self::from_layer(StrategyLayer::Composite(layers.into()), metrics)
    }

    pub fn kind(&self) -> StrategyKind {
        match &self.layer {
            StrategyLayer::Passthrough => StrategyKind::Passthrough,
            StrategyLayer::Adaptive(_) => StrategyKind::Adaptive,
            StrategyLayer::Memoizing(_) => StrategyKind::Memoizing,
            StrategyLayer::Batching(_) => StrategyKind::Batching,
            StrategyLayer::Retry(_) => StrategyKind::Retry,
            StrategyLayer::CircuitBreaker(_) => StrategyKind::CircuitBreaker,
            StrategyLayer::Throttle(_) => StrategyKind::Throttle,
            StrategyLayer::Composite(_) => StrategyKind::Composite,
        }
    }

    pub fn layer(&self) -> &StrategyLayer {
        &self.layer
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Nested layers of a composite, empty for every other strategy.
    pub fn layers(&self) -> &[ExecutionStrategy] {
        match &self.layer {
            StrategyLayer::Composite(layers) => layers,
            _ => &[],
        }
    }

    /// Drop memoized results held anywhere in this strategy. Returns the
    /// number of results dropped.
    pub fn clear_memoized(&self) -> usize {
        match &self.layer {
            StrategyLayer::Memoizing(memo) => memo.clear(),
            StrategyLayer::Composite(layers) => {
                layers.iter().map(ExecutionStrategy::clear_memoized).sum()
            }
            _ => 0,
        }
    }

    pub fn execute<'a, T>(&'a self, op: Operation<'a, T>) -> BoxFuture<'a, Result<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.run(Arc::from(UNIT_KEY), op)
    }

    /// Execute with the call arguments that identify the result for memoization.
    pub fn execute_with<'a, A, T>(&'a self, args: &A, op: Operation<'a, T>) -> BoxFuture<'a, Result<T>>
    where
        A: Serialize + ?Sized,
        T: Clone + Send + Sync + 'static,
    {
        match serde_json::to_string(args) {
            Ok(key) => self.run(Arc::from(key), op),
            Err(err) => async move { Err::<T, _>(CodeAtlasError::from(err)) }.boxed(),
        }
    }

    /// Run a list of operations. Batching strategies group them; every other
    /// strategy runs them one after another. Results keep input order.
    pub async fn execute_all<'a, T>(&'a self, ops: Vec<Operation<'a, T>>) -> Vec<Result<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let StrategyLayer::Batching(batching) = &self.layer {
            return batching.run_all(ops, &self.metrics).await;
        }

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            results.push(self.execute(op).await);
        }
        results
    }

    fn run<'a, T>(&'a self, key: Arc<str>, op: Operation<'a, T>) -> BoxFuture<'a, Result<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        async move {
            let started = Instant::now();
            let result = match &self.layer {
                StrategyLayer::Passthrough => op().await,
                StrategyLayer::Adaptive(adaptive) => adaptive.run(op).await,
                StrategyLayer::Memoizing(memo) => memo.run(&key, op).await,
                StrategyLayer::Batching(batching) => batching.run(op).await,
                StrategyLayer::Retry(retry) => retry.run(op).await,
                StrategyLayer::CircuitBreaker(breaker) => breaker.run(op).await,
                StrategyLayer::Throttle(throttle) => throttle.run(op).await,
                StrategyLayer::Composite(layers) => chain(layers, key, op).await,
            };
            self.metrics
                .record(self.kind(), started.elapsed(), result.is_ok());
            result
        }
        .boxed()
    }
}

fn chain<'a, T>(
    layers: &'a [ExecutionStrategy],
    key: Arc<str>,
    op: Operation<'a, T>,
) -> BoxFuture<'a, Result<T>>
where
    T: Clone + Send + Sync + 'static,
{
    match layers.split_first() {
        None => op(),
        Some((outer, rest)) => {
            let inner_key = key.clone();
            let inner: Operation<'a, T> =
                Arc::new(move || chain(rest, inner_key.clone(), op.clone()));
            outer.run(key, inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation;
    use codeatlas_core::CodeAtlasError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_compose_runs_first_layer_outermost() {
        let metrics = registry();
        // memo outside retry: a failure-then-success is retried, then memoized
        let strategy = ExecutionStrategy::compose(
            vec![
                ExecutionStrategy::memoizing(MemoizeOptions::default(), metrics.clone()),
                ExecutionStrategy::retry(
                    RetryOptions {
                        max_retries: 2,
                        initial_delay: Duration::from_millis(10),
                        ..RetryOptions::default()
                    },
                    metrics.clone(),
                ),
            ],
            metrics.clone(),
        );

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let op = operation(move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(CodeAtlasError::Io(std::io::Error::other("first")))
            } else {
                Ok(n)
            }
        });

        assert_eq!(strategy.execute_with(&("a.rs",), op.clone()).await.unwrap(), 1);
        assert_eq!(strategy.execute_with(&("a.rs",), op.clone()).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot[&StrategyKind::Composite].executions, 2);
        assert_eq!(snapshot[&StrategyKind::Memoizing].executions, 2);
        assert_eq!(snapshot[&StrategyKind::Retry].executions, 1);
    }

    #[tokio::test]
    async fn test_layer_order_is_observable() {
        let metrics = registry();
        let strategy = ExecutionStrategy::compose(
            vec![
                ExecutionStrategy::adaptive(AdaptiveOptions::default(), metrics.clone()),
                ExecutionStrategy::passthrough(metrics.clone()),
            ],
            metrics.clone(),
        );
        let log = Mutex::new(Vec::new());
        let entries = &log;
        strategy
            .execute(operation(move || async move {
                entries.lock().push("op");
                Ok::<_, CodeAtlasError>(())
            }))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["op"]);

        // inner layers finish (and record) before outer ones
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot[&StrategyKind::Passthrough].executions, 1);
        assert_eq!(snapshot[&StrategyKind::Adaptive].executions, 1);
        assert_eq!(snapshot[&StrategyKind::Composite].executions, 1);
    }

    #[tokio::test]
    async fn test_nested_composites() {
        let metrics = registry();
        let inner = ExecutionStrategy::compose(
            vec![ExecutionStrategy::memoizing(MemoizeOptions::default(), metrics.clone())],
            metrics.clone(),
        );
        let outer = ExecutionStrategy::compose(
            vec![ExecutionStrategy::passthrough(metrics.clone()), inner],
            metrics.clone(),
        );
        let op = operation(|| async { Ok::<_, CodeAtlasError>("x".to_string()) });
        outer.execute(op.clone()).await.unwrap();
        outer.execute(op).await.unwrap();
        assert_eq!(metrics.get(StrategyKind::Composite).unwrap().executions, 4);
        assert_eq!(outer.clear_memoized(), 1);
    }

    #[tokio::test]
    async fn test_execute_all_sequential_for_non_batching() {
        let metrics = registry();
        let strategy = ExecutionStrategy::passthrough(metrics.clone());
        let ops: Vec<Operation<'_, u32>> = (0..3)
            .map(|i| operation(move || async move { Ok::<_, CodeAtlasError>(i) }))
            .collect();
        let results = strategy.execute_all(ops).await;
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(metrics.get(StrategyKind::Passthrough).unwrap().executions, 3);
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let metrics = registry();
        let strategy = ExecutionStrategy::retry(
            RetryOptions {
                max_retries: 0,
                ..RetryOptions::default()
            },
            metrics.clone(),
        );
        let result = strategy
            .execute(operation(|| async {
                Err::<(), _>(CodeAtlasError::Parse("bad".into()))
            }))
            .await;
        assert!(result.is_err());
        let recorded = metrics.get(StrategyKind::Retry).unwrap();
        assert_eq!(recorded.failures, 1);
        assert_eq!(recorded.successes, 0);
    }
}
