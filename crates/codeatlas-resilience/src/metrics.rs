// ABOUTME: Per-strategy execution counters shared by every strategy built from one registry.
// ABOUTME: Registries are owned instances so independent pipelines never share counters.
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Passthrough,
    Adaptive,
    Memoizing,
    Batching,
    Retry,
    CircuitBreaker,
    Throttle,
    Composite,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Passthrough => "passthrough",
            StrategyKind::Adaptive => "adaptive",
            StrategyKind::Memoizing => "memoizing",
            StrategyKind::Batching => "batching",
            StrategyKind::Retry => "retry",
            StrategyKind::CircuitBreaker => "circuit_breaker",
            StrategyKind::Throttle => "throttle",
            StrategyKind::Composite => "composite",
        };
        write!(f, "{}", s)
    }
}

/// Execution counters for one strategy kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: f64,
    pub average_latency_ms: f64,
    pub last_latency_ms: f64,
}

impl StrategyMetrics {
    fn record(&mut self, latency: Duration, success: bool) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_latency_ms += ms;
        self.average_latency_ms = self.total_latency_ms / self.executions as f64;
        self.last_latency_ms = ms;
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    by_kind: DashMap<StrategyKind, StrategyMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: StrategyKind, latency: Duration, success: bool) {
        self.by_kind
            .entry(kind)
            .or_default()
            .record(latency, success);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<StrategyMetrics> {
        self.by_kind.get(&kind).map(|m| m.clone())
    }

    /// Copy of every kind's counters, ordered by kind.
    pub fn snapshot(&self) -> BTreeMap<StrategyKind, StrategyMetrics> {
        self.by_kind
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn reset(&self) {
        self.by_kind.clear();
    }
}
