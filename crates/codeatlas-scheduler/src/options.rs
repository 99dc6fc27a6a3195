use codeatlas_core::SchedulerConfig;
use codeatlas_parser::DiscoveryOptions;
use std::time::Duration;

/// Options for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Files per batch; a batch is processed concurrently
    pub max_concurrent_files: usize,
    pub timeout_per_file: Duration,
    /// Deadline over discovery and every batch
    pub overall_timeout: Duration,
    pub enable_progress: bool,
    pub progress_interval: Duration,
    pub max_depth: Option<usize>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub enable_instrumentation: bool,
    pub batch_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for RunOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_files: config.max_concurrent_files,
            timeout_per_file: Duration::from_millis(config.timeout_per_file_ms),
            overall_timeout: Duration::from_millis(config.overall_timeout_ms),
            enable_progress: config.enable_progress,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            max_depth: config.max_depth,
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            enable_instrumentation: config.enable_instrumentation,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

impl RunOptions {
    /// Batch size actually used; zero is treated as one.
    pub fn batch_size(&self) -> usize {
        self.max_concurrent_files.max(1)
    }

    pub fn discovery(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            max_depth: self.max_depth,
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_scheduler_config() {
        let options = RunOptions::default();
        assert_eq!(options.max_concurrent_files, 10);
        assert_eq!(options.timeout_per_file, Duration::from_secs(30));
        assert_eq!(options.overall_timeout, Duration::from_secs(600));
        assert_eq!(options.progress_interval, Duration::from_secs(1));
        assert!(options.enable_instrumentation);
        assert_eq!(options.batch_delay, Duration::ZERO);
    }

    #[test]
    fn test_zero_concurrency_is_one() {
        let options = RunOptions {
            max_concurrent_files: 0,
            ..RunOptions::default()
        };
        assert_eq!(options.batch_size(), 1);
    }
}
