// ABOUTME: Samples process memory against a budget and maps pressure to reclamation actions.
// ABOUTME: Anything holding droppable state implements Reclaimable so the governor can shrink it.

use crate::IncrementalCache;
use chrono::{DateTime, Utc};
use codeatlas_core::MemorySettings;
use codeatlas_resilience::StrategySelector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Memory pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
}

impl fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPressure::Low => write!(f, "low"),
            MemoryPressure::Medium => write!(f, "medium"),
            MemoryPressure::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAction {
    /// Release spare capacity held by caches
    ForceReclaim,
    ClearCache,
    TrimCache,
    /// Advisory: callers may lower their concurrency
    ReduceConcurrency,
}

/// Raw memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub total_bytes: u64,
}

pub trait MemoryProbe: Send + Sync {
    fn read(&self) -> MemoryReading;
}

/// Reads the current process via `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current process id: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn read(&self) -> MemoryReading {
        let mut system = self.system.lock();
        system.refresh_memory();
        let mut reading = MemoryReading {
            total_bytes: system.total_memory(),
            ..MemoryReading::default()
        };

        if let Some(pid) = self.pid {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            if let Some(process) = system.process(pid) {
                reading.rss_bytes = process.memory();
                reading.virtual_bytes = process.virtual_memory();
            }
        }
        reading
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    pub level: MemoryPressure,
    /// Virtual memory of the process in bytes; the probe has no finer heap figure.
    pub heap_used: u64,
    /// Resident set size in bytes
    pub rss: u64,
    /// Budget `rss` is measured against, in bytes
    pub budget: u64,
    pub usage_ratio: f64,
    pub recommendations: Vec<MemoryAction>,
    pub sampled_at: DateTime<Utc>,
}

/// Component holding state the governor may drop under pressure.
pub trait Reclaimable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop roughly `fraction` of the held entries. Returns entries dropped.
    fn trim(&self, fraction: f64) -> usize;

    /// Drop everything. Returns entries dropped.
    fn clear(&self) -> usize;

    /// Release spare capacity without dropping entries.
    fn shrink(&self) {}
}

impl Reclaimable for IncrementalCache {
    fn name(&self) -> &str {
        "incremental_cache"
    }

    fn trim(&self, fraction: f64) -> usize {
        IncrementalCache::trim(self, fraction)
    }

    fn clear(&self) -> usize {
        self.clear_cache()
    }

    fn shrink(&self) {
        IncrementalCache::shrink(self)
    }
}

impl Reclaimable for StrategySelector {
    fn name(&self) -> &str {
        "strategy_memo"
    }

    // memoized results have no useful partial order, so a trim drops them all
    fn trim(&self, _fraction: f64) -> usize {
        self.clear_memoized()
    }

    fn clear(&self) -> usize {
        self.clear_memoized()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub actions: Vec<MemoryAction>,
    pub entries_released: usize,
    pub reduce_concurrency: bool,
    pub rss_before: u64,
    pub rss_after: u64,
}

pub struct MemoryGovernor {
    settings: MemorySettings,
    probe: Arc<dyn MemoryProbe>,
    last_sample: Mutex<Option<PressureSample>>,
}

impl fmt::Debug for MemoryGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGovernor")
            .field("settings", &self.settings)
            .field("last_sample", &*self.last_sample.lock())
            .finish()
    }
}

impl MemoryGovernor {
    pub fn new(settings: MemorySettings) -> Self {
        Self::with_probe(settings, Arc::new(SysinfoProbe::new()))
    }

    pub fn with_probe(settings: MemorySettings, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            settings,
            probe,
            last_sample: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn last_sample(&self) -> Option<PressureSample> {
        self.last_sample.lock().clone()
    }

    pub fn recommendations_for(level: MemoryPressure) -> Vec<MemoryAction> {
        match level {
            MemoryPressure::High => vec![MemoryAction::ForceReclaim, MemoryAction::ClearCache],
            MemoryPressure::Medium => vec![MemoryAction::TrimCache],
            MemoryPressure::Low => Vec::new(),
        }
    }

    fn level_for(&self, ratio: f64) -> MemoryPressure {
        if ratio >= self.settings.high_threshold {
            MemoryPressure::High
        } else if ratio >= self.settings.medium_threshold {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    pub fn check_memory_pressure(&self) -> PressureSample {
        let reading = self.probe.read();
        let budget = if self.settings.max_memory_bytes > 0 {
            self.settings.max_memory_bytes
        } else {
            reading.total_bytes
        };
        let usage_ratio = if budget == 0 {
            0.0
        } else {
            reading.rss_bytes as f64 / budget as f64
        };
        let level = self.level_for(usage_ratio);

        let sample = PressureSample {
            level,
            usage_ratio,
            heap_used: reading.virtual_bytes,
            rss: reading.rss_bytes,
            budget,
            recommendations: Self::recommendations_for(level),
            sampled_at: Utc::now(),
        };
        debug!(
            "Memory pressure {} ({:.1}% of {} bytes)",
            level,
            usage_ratio * 100.0,
            budget
        );
        *self.last_sample.lock() = Some(sample.clone());
        sample
    }

    pub fn optimize_memory(
        &self,
        actions: &[MemoryAction],
        targets: &[&dyn Reclaimable],
    ) -> ReclaimReport {
        let rss_before = self.probe.read().rss_bytes;
        let mut report = ReclaimReport {
            actions: actions.to_vec(),
            rss_before,
            ..ReclaimReport::default()
        };

        for action in actions {
            match action {
                MemoryAction::ForceReclaim => {
                    for target in targets {
                        target.shrink();
                    }
                }
                MemoryAction::ClearCache => {
                    for target in targets {
                        let released = target.clear();
                        debug!("Cleared {} entries from {}", released, target.name());
                        report.entries_released += released;
                    }
                }
                MemoryAction::TrimCache => {
                    for target in targets {
                        let released = target.trim(self.settings.trim_fraction);
                        debug!("Trimmed {} entries from {}", released, target.name());
                        report.entries_released += released;
                    }
                }
                MemoryAction::ReduceConcurrency => report.reduce_concurrency = true,
            }
        }

        report.rss_after = self.probe.read().rss_bytes;
        info!(
            "Memory optimization released {} entries (rss {} -> {} bytes)",
            report.entries_released, report.rss_before, report.rss_after
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheEntry, MemoryStorage};
    use codeatlas_core::{CacheSettings, FileFacts, Language, StrategyConfig};
    use codeatlas_resilience::{ExecutionStrategy, MetricsRegistry};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedProbe {
        rss: AtomicU64,
        total: u64,
    }

    impl MemoryProbe for FixedProbe {
        fn read(&self) -> MemoryReading {
            MemoryReading {
                rss_bytes: self.rss.load(Ordering::SeqCst),
                virtual_bytes: 0,
                total_bytes: self.total,
            }
        }
    }

    fn governor(rss: u64, settings: MemorySettings) -> (MemoryGovernor, Arc<FixedProbe>) {
        let probe = Arc::new(FixedProbe {
            rss: AtomicU64::new(rss),
            total: 1000,
        });
        (MemoryGovernor::with_probe(settings, probe.clone()), probe)
    }

    #[test]
    fn test_levels_follow_thresholds() {
        let (gov, probe) = governor(500, MemorySettings::default());
        assert_eq!(gov.check_memory_pressure().level, MemoryPressure::Low);

        probe.rss.store(700, Ordering::SeqCst);
        let sample = gov.check_memory_pressure();
        assert_eq!(sample.level, MemoryPressure::Medium);
        assert_eq!(sample.recommendations, vec![MemoryAction::TrimCache]);

        probe.rss.store(850, Ordering::SeqCst);
        let sample = gov.check_memory_pressure();
        assert_eq!(sample.level, MemoryPressure::High);
        assert_eq!(
            sample.recommendations,
            vec![MemoryAction::ForceReclaim, MemoryAction::ClearCache]
        );
        assert_eq!(gov.last_sample().unwrap().level, MemoryPressure::High);
    }

    #[test]
    fn test_explicit_budget_overrides_system_total() {
        let settings = MemorySettings {
            max_memory_bytes: 100,
            ..MemorySettings::default()
        };
        let (gov, _) = governor(90, settings);
        let sample = gov.check_memory_pressure();
        assert_eq!(sample.budget, 100);
        assert_eq!(sample.rss, 90);
        assert_eq!(sample.level, MemoryPressure::High);
    }

    #[test]
    fn test_optimize_clears_and_trims_targets() {
        let metrics = Arc::new(MetricsRegistry::new());
        let io = Arc::new(ExecutionStrategy::passthrough(metrics.clone()));
        let cache = IncrementalCache::new(
            &CacheSettings::default(),
            Arc::new(MemoryStorage::new()),
            io,
        );
        for i in 0..4 {
            cache.set_cache(
                &format!("f{}.py", i),
                CacheEntry::new("h", Language::Python, FileFacts::default()),
            );
        }
        let selector = StrategySelector::new(&StrategyConfig::default(), metrics);
        let (gov, _) = governor(900, MemorySettings::default());

        let report = gov.optimize_memory(&[MemoryAction::TrimCache], &[&cache, &selector]);
        assert_eq!(report.entries_released, 2);
        assert_eq!(cache.len(), 2);

        let report = gov.optimize_memory(
            &MemoryGovernor::recommendations_for(MemoryPressure::High),
            &[&cache, &selector],
        );
        assert_eq!(report.entries_released, 2);
        assert!(cache.is_empty());
        assert!(!report.reduce_concurrency);
    }
}
