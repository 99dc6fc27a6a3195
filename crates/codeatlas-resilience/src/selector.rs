use crate::{
    AdaptiveOptions, BatchOptions, CircuitBreakerOptions, ExecutionStrategy, MemoizeOptions,
    MetricsRegistry, RetryOptions, ThrottleOptions,
};
use codeatlas_core::StrategyConfig;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_PARSER_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an operation runs, which decides the strategy it gets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyContext {
    Cache,
    Network,
    Batch,
    Adaptive,
    Parser,
    Io,
    Other(String),
}

impl fmt::Display for StrategyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyContext::Cache => write!(f, "cache"),
            StrategyContext::Network => write!(f, "network"),
            StrategyContext::Batch => write!(f, "batch"),
            StrategyContext::Adaptive => write!(f, "adaptive"),
            StrategyContext::Parser => write!(f, "parser"),
            StrategyContext::Io => write!(f, "io"),
            StrategyContext::Other(tag) => write!(f, "{}", tag),
        }
    }
}

impl FromStr for StrategyContext {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "cache" => StrategyContext::Cache,
            "network" => StrategyContext::Network,
            "batch" => StrategyContext::Batch,
            "adaptive" => StrategyContext::Adaptive,
            "parser" => StrategyContext::Parser,
            "io" => StrategyContext::Io,
            _ => StrategyContext::Other(s.to_string()),
        })
    }
}

/// Pre-built strategies for every known context, sharing one metrics registry.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    cache: Arc<ExecutionStrategy>,
    network: Arc<ExecutionStrategy>,
    batch: Arc<ExecutionStrategy>,
    adaptive: Arc<ExecutionStrategy>,
    parser: Arc<ExecutionStrategy>,
    io: Arc<ExecutionStrategy>,
    fallback: Arc<ExecutionStrategy>,
    metrics: Arc<MetricsRegistry>,
}

impl StrategySelector {
    pub fn new(config: &StrategyConfig, metrics: Arc<MetricsRegistry>) -> Self {
        let retry_delay = Duration::from_millis(config.retry_delay_ms);
        let retry = |initial_delay: Duration| {
            ExecutionStrategy::retry(
                RetryOptions {
                    max_retries: config.max_retries,
                    initial_delay,
                    backoff_multiplier: config.backoff_multiplier,
                    ..RetryOptions::default()
                },
                metrics.clone(),
            )
        };

        let cache = ExecutionStrategy::compose(
            vec![
                retry(retry_delay),
                ExecutionStrategy::memoizing(
                    MemoizeOptions {
                        ttl: Duration::from_millis(config.memo_ttl_ms),
                        max_size: config.memo_max_size,
                    },
                    metrics.clone(),
                ),
            ],
            metrics.clone(),
        );

        let network = ExecutionStrategy::compose(
            vec![
                ExecutionStrategy::circuit_breaker(
                    CircuitBreakerOptions {
                        failure_threshold: config.failure_threshold,
                        reset_timeout: Duration::from_millis(config.reset_timeout_ms),
                        is_failure: None,
                    },
                    metrics.clone(),
                ),
                retry(retry_delay * 10),
                ExecutionStrategy::throttle(
                    ThrottleOptions {
                        rate_limit: config.rate_limit,
                        window: Duration::from_millis(config.window_ms),
                    },
                    metrics.clone(),
                ),
            ],
            metrics.clone(),
        );

        let batch = ExecutionStrategy::batching(
            BatchOptions {
                batch_size: config.batch_size,
                delay: Duration::from_millis(config.batch_delay_ms),
            },
            metrics.clone(),
        );

        let adaptive = ExecutionStrategy::adaptive(
            AdaptiveOptions {
                fast_threshold: Duration::from_millis(config.fast_threshold_ms),
                slow_threshold: Duration::from_millis(config.slow_threshold_ms),
            },
            metrics.clone(),
        );

        let io = retry(retry_delay / 2);

        let fallback = ExecutionStrategy::retry(
            RetryOptions {
                max_retries: 1,
                initial_delay: Duration::ZERO,
                ..RetryOptions::default()
            },
            metrics.clone(),
        );

        Self {
            cache: Arc::new(cache),
            network: Arc::new(network),
            batch: Arc::new(batch),
            adaptive: Arc::new(adaptive),
            parser: Arc::new(Self::parser_strategy(DEFAULT_PARSER_TIMEOUT, &metrics)),
            io: Arc::new(io),
            fallback: Arc::new(fallback),
            metrics,
        }
    }

    /// Rebuild the parser strategy around a per-file timeout.
    pub fn with_parser_timeout(mut self, timeout: Duration) -> Self {
        self.parser = Arc::new(Self::parser_strategy(timeout, &self.metrics));
        self
    }

    fn parser_strategy(timeout: Duration, metrics: &Arc<MetricsRegistry>) -> ExecutionStrategy {
        ExecutionStrategy::adaptive(
            AdaptiveOptions {
                fast_threshold: timeout / 10,
                slow_threshold: timeout / 2,
            },
            metrics.clone(),
        )
    }

    pub fn select(&self, context: &StrategyContext) -> Arc<ExecutionStrategy> {
        match context {
            StrategyContext::Cache => self.cache.clone(),
            StrategyContext::Network => self.network.clone(),
            StrategyContext::Batch => self.batch.clone(),
            StrategyContext::Adaptive => self.adaptive.clone(),
            StrategyContext::Parser => self.parser.clone(),
            StrategyContext::Io => self.io.clone(),
            StrategyContext::Other(tag) => {
                debug!("No strategy for context '{}', using single retry", tag);
                self.fallback.clone()
            }
        }
    }

    pub fn select_tag(&self, tag: &str) -> Arc<ExecutionStrategy> {
        let context = match tag.parse::<StrategyContext>() {
            Ok(context) => context,
            Err(never) => match never {},
        };
        self.select(&context)
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Drop memoized results from every strategy this selector hands out.
    pub fn clear_memoized(&self) -> usize {
        [
            &self.cache,
            &self.network,
            &self.batch,
            &self.adaptive,
            &self.parser,
            &self.io,
            &self.fallback,
        ]
        .iter()
        .map(|strategy| strategy.clear_memoized())
        .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{operation, RetryStrategy, StrategyKind, StrategyLayer};
    use codeatlas_core::CodeAtlasError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn selector() -> StrategySelector {
        StrategySelector::new(&StrategyConfig::default(), Arc::new(MetricsRegistry::new()))
    }

    fn kinds(strategy: &ExecutionStrategy) -> Vec<StrategyKind> {
        strategy.layers().iter().map(ExecutionStrategy::kind).collect()
    }

    fn retry_of(strategy: &ExecutionStrategy) -> &RetryStrategy {
        match strategy.layer() {
            StrategyLayer::Retry(retry) => retry,
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_context_parsing() {
        assert_eq!("Cache".parse::<StrategyContext>().unwrap(), StrategyContext::Cache);
        assert_eq!(" io ".parse::<StrategyContext>().unwrap(), StrategyContext::Io);
        assert_eq!(
            "gpu".parse::<StrategyContext>().unwrap(),
            StrategyContext::Other("gpu".to_string())
        );
        assert_eq!(StrategyContext::Network.to_string(), "network");
    }

    #[test]
    fn test_known_contexts_map_to_configured_strategies() {
        let selector = selector();
        assert_eq!(
            kinds(&selector.select(&StrategyContext::Cache)),
            vec![StrategyKind::Retry, StrategyKind::Memoizing]
        );
        assert_eq!(
            kinds(&selector.select(&StrategyContext::Network)),
            vec![
                StrategyKind::CircuitBreaker,
                StrategyKind::Retry,
                StrategyKind::Throttle
            ]
        );
        assert_eq!(
            selector.select(&StrategyContext::Batch).kind(),
            StrategyKind::Batching
        );
        assert_eq!(
            selector.select(&StrategyContext::Parser).kind(),
            StrategyKind::Adaptive
        );

        let network = selector.select(&StrategyContext::Network);
        assert_eq!(
            retry_of(&network.layers()[1]).options().initial_delay,
            Duration::from_secs(1)
        );
        let io = selector.select(&StrategyContext::Io);
        assert_eq!(retry_of(&io).options().initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_selection_is_shared() {
        let selector = selector();
        let a = selector.select_tag("cache");
        let b = selector.select(&StrategyContext::Cache);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unknown_context_retries_once() {
        let selector = selector();
        let strategy = selector.select_tag("quantum");
        let options = retry_of(&strategy).options();
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.initial_delay, Duration::ZERO);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = strategy
            .execute(operation(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CodeAtlasError::Timeout { operation: "lookup".into(), elapsed_ms: 1 })
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_memoized_reaches_cache_strategy() {
        let selector = selector();
        let cache = selector.select(&StrategyContext::Cache);
        cache
            .execute_with(&"key", operation(|| async { Ok::<_, CodeAtlasError>(5u32) }))
            .await
            .unwrap();
        assert_eq!(selector.clear_memoized(), 1);
        assert_eq!(selector.clear_memoized(), 0);
    }
}
