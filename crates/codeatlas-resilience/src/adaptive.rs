use crate::Operation;
use codeatlas_core::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Fast,
    Slow,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Fast => write!(f, "fast"),
            ExecutionMode::Slow => write!(f, "slow"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveOptions {
    pub fast_threshold: Duration,
    pub slow_threshold: Duration,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            fast_threshold: Duration::from_millis(100),
            slow_threshold: Duration::from_millis(1000),
        }
    }
}

/// Tracks whether recent executions have been fast or slow. The mode is
/// advisory only.
#[derive(Debug)]
pub struct AdaptiveStrategy {
    options: AdaptiveOptions,
    mode: Mutex<ExecutionMode>,
}

impl AdaptiveStrategy {
    pub fn new(options: AdaptiveOptions) -> Self {
        Self {
            options,
            mode: Mutex::new(ExecutionMode::Fast),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        *self.mode.lock()
    }

    pub fn options(&self) -> &AdaptiveOptions {
        &self.options
    }

    pub fn observe(&self, latency: Duration) {
        let next = if latency >= self.options.slow_threshold {
            ExecutionMode::Slow
        } else if latency <= self.options.fast_threshold {
            ExecutionMode::Fast
        } else {
            return;
        };

        let mut mode = self.mode.lock();
        if *mode != next {
            info!(
                "Adaptive strategy switching {} -> {} (latency {:?})",
                *mode, next, latency
            );
            *mode = next;
        }
    }

    pub(crate) async fn run<'a, T>(&self, op: Operation<'a, T>) -> Result<T> {
        let started = Instant::now();
        let result = op().await;
        self.observe(started.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation;
    use codeatlas_core::CodeAtlasError;

    fn sleeper(ms: u64) -> Operation<'static, ()> {
        operation(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, CodeAtlasError>(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_follows_latency() {
        let adaptive = AdaptiveStrategy::new(AdaptiveOptions::default());
        assert_eq!(adaptive.mode(), ExecutionMode::Fast);

        adaptive.run(sleeper(1500)).await.unwrap();
        assert_eq!(adaptive.mode(), ExecutionMode::Slow);

        // between the thresholds the mode is sticky
        adaptive.run(sleeper(500)).await.unwrap();
        assert_eq!(adaptive.mode(), ExecutionMode::Slow);

        adaptive.run(sleeper(50)).await.unwrap();
        assert_eq!(adaptive.mode(), ExecutionMode::Fast);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let adaptive = AdaptiveStrategy::new(AdaptiveOptions::default());
        adaptive.observe(Duration::from_millis(1000));
        assert_eq!(adaptive.mode(), ExecutionMode::Slow);
        adaptive.observe(Duration::from_millis(100));
        assert_eq!(adaptive.mode(), ExecutionMode::Fast);
    }
}
