use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::CodeAtlasError {
    fn from(err: ConfigError) -> Self {
        crate::CodeAtlasError::Config(err.to_string())
    }
}

/// Main configuration for CodeAtlas
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AtlasConfig {
    /// File scheduling, timeouts and discovery filters
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Incremental cache sizing and persistence
    #[serde(default)]
    pub cache: CacheSettings,

    /// Memory pressure thresholds
    #[serde(default)]
    pub memory: MemorySettings,

    /// Tuning of the pre-configured resilience strategies
    #[serde(default)]
    pub strategies: StrategyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    #[serde(default = "default_timeout_per_file_ms")]
    pub timeout_per_file_ms: u64,

    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,

    #[serde(default)]
    pub enable_progress: bool,

    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Pause between batches; zero disables it
    #[serde(default)]
    pub batch_delay_ms: u64,

    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Glob patterns a file must match (empty = all supported files)
    #[serde(default)]
    pub include: Vec<String>,

    /// Extra directory/file globs pruned during discovery
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Attach the performance report to snapshots
    #[serde(default = "default_true")]
    pub enable_instrumentation: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            timeout_per_file_ms: default_timeout_per_file_ms(),
            overall_timeout_ms: default_overall_timeout_ms(),
            enable_progress: false,
            progress_interval_ms: default_progress_interval_ms(),
            batch_delay_ms: 0,
            max_depth: None,
            include: Vec::new(),
            exclude: Vec::new(),
            enable_instrumentation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Entry lifetime; `None` keeps entries until invalidated
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub enable_persistence: bool,

    /// Directory (relative to the analysed root) holding the persisted cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cache_size: default_max_cache_size(),
            default_ttl_secs: None,
            enable_persistence: true,
            cache_dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySettings {
    /// Memory budget in bytes; 0 uses total system memory
    #[serde(default)]
    pub max_memory_bytes: u64,

    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,

    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Share of cache entries dropped by a trim
    #[serde(default = "default_trim_fraction")]
    pub trim_fraction: f64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_memory_bytes: 0,
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
            trim_fraction: default_trim_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_memo_ttl_ms")]
    pub memo_ttl_ms: u64,

    #[serde(default = "default_memo_max_size")]
    pub memo_max_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_fast_threshold_ms")]
    pub fast_threshold_ms: u64,

    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            rate_limit: default_rate_limit(),
            window_ms: default_window_ms(),
            memo_ttl_ms: default_memo_ttl_ms(),
            memo_max_size: default_memo_max_size(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            fast_threshold_ms: default_fast_threshold_ms(),
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent_files() -> usize {
    10
}
fn default_timeout_per_file_ms() -> u64 {
    30_000
}
fn default_overall_timeout_ms() -> u64 {
    600_000
}
fn default_progress_interval_ms() -> u64 {
    1_000
}
fn default_max_cache_size() -> usize {
    10_000
}
fn default_cache_dir() -> String {
    ".codeatlas".to_string()
}
fn default_medium_threshold() -> f64 {
    0.70
}
fn default_high_threshold() -> f64 {
    0.85
}
fn default_trim_fraction() -> f64 {
    0.5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    60_000
}
fn default_rate_limit() -> usize {
    100
}
fn default_window_ms() -> u64 {
    1_000
}
fn default_memo_ttl_ms() -> u64 {
    300_000
}
fn default_memo_max_size() -> usize {
    1_000
}
fn default_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_fast_threshold_ms() -> u64 {
    100
}
fn default_slow_threshold_ms() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl AtlasConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent_files == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_concurrent_files must be at least 1".to_string(),
            ));
        }
        if self.scheduler.timeout_per_file_ms == 0 || self.scheduler.overall_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler timeouts must be positive".to_string(),
            ));
        }

        let m = &self.memory;
        if !(0.0 < m.medium_threshold && m.medium_threshold < m.high_threshold && m.high_threshold <= 1.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "memory thresholds must satisfy 0 < medium ({}) < high ({}) <= 1",
                m.medium_threshold, m.high_threshold
            )));
        }
        if !(0.0..=1.0).contains(&m.trim_fraction) {
            return Err(ConfigError::ValidationError(format!(
                "memory.trim_fraction must be within 0..=1, got {}",
                m.trim_fraction
            )));
        }

        let s = &self.strategies;
        if s.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "strategies.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if s.failure_threshold == 0 || s.rate_limit == 0 || s.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "strategies.failure_threshold, rate_limit and batch_size must be positive"
                    .to_string(),
            ));
        }
        if s.fast_threshold_ms > s.slow_threshold_ms {
            return Err(ConfigError::ValidationError(
                "strategies.fast_threshold_ms must not exceed slow_threshold_ms".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}. Must be pretty or compact",
                self.logging.format
            )));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Loads configuration with the following precedence:
/// 1. Environment variables (`CODEATLAS_*`, `RUST_LOG`)
/// 2. Config file (`./.codeatlas.toml`, then `~/.codeatlas/config.toml`)
/// 3. Defaults
pub struct ConfigManager {
    config: AtlasConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn load() -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file()?;
        Self::finish(config, config_path)
    }

    /// Load an explicit file; a missing file is an error here.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    fn finish(config: AtlasConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_env_overrides(config);
        config.validate()?;

        match &config_path {
            Some(path) => info!("Config file: {}", path.display()),
            None => info!("No config file found, using defaults"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    fn load_config_file() -> Result<(AtlasConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".codeatlas.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".codeatlas").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((AtlasConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<AtlasConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: AtlasConfig) -> AtlasConfig {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring unparseable {}={}", name, raw);
                    None
                }
            }
        }

        if let Some(n) = parsed("CODEATLAS_MAX_CONCURRENT_FILES") {
            config.scheduler.max_concurrent_files = n;
        }
        if let Some(ms) = parsed("CODEATLAS_TIMEOUT_PER_FILE_MS") {
            config.scheduler.timeout_per_file_ms = ms;
        }
        if let Some(ms) = parsed("CODEATLAS_OVERALL_TIMEOUT_MS") {
            config.scheduler.overall_timeout_ms = ms;
        }
        if let Ok(progress) = std::env::var("CODEATLAS_PROGRESS") {
            config.scheduler.enable_progress = progress.to_lowercase() == "true" || progress == "1";
        }
        if let Some(n) = parsed("CODEATLAS_MAX_CACHE_SIZE") {
            config.cache.max_cache_size = n;
        }
        if let Ok(persist) = std::env::var("CODEATLAS_CACHE_PERSISTENCE") {
            config.cache.enable_persistence = persist.to_lowercase() == "true" || persist == "1";
        }
        if let Some(bytes) = parsed("CODEATLAS_MAX_MEMORY_BYTES") {
            config.memory.max_memory_bytes = bytes;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            // Only plain levels fit the config; directive strings stay with EnvFilter.
            if matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
                config.logging.level = level;
            }
        }

        config
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn into_config(self) -> AtlasConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AtlasConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrent_files, 10);
        assert!(config.cache.enable_persistence);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = AtlasConfig::default();
        config.memory.medium_threshold = 0.9;
        config.memory.high_threshold = 0.8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AtlasConfig = toml::from_str(
            r#"
            [scheduler]
            max_concurrent_files = 4

            [cache]
            default_ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrent_files, 4);
        assert_eq!(config.scheduler.timeout_per_file_ms, 30_000);
        assert_eq!(config.cache.default_ttl_secs, Some(60));
        assert_eq!(config.strategies.max_retries, 3);
    }
}
