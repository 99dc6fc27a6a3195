use codeatlas_core::{AtlasConfig, ConfigError, ConfigManager};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_config_file_loading() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("codeatlas.toml");
    fs::write(
        &config_path,
        r#"
[scheduler]
max_concurrent_files = 3
timeout_per_file_ms = 500
exclude = ["generated"]

[memory]
medium_threshold = 0.6
high_threshold = 0.9

[logging]
level = "debug"
format = "compact"
"#,
    )
    .unwrap();

    let manager = ConfigManager::from_path(&config_path).unwrap();
    let config = manager.config();
    assert_eq!(config.scheduler.max_concurrent_files, 3);
    assert_eq!(config.scheduler.timeout_per_file_ms, 500);
    assert_eq!(config.scheduler.exclude, vec!["generated".to_string()]);
    assert_eq!(config.memory.high_threshold, 0.9);
    assert_eq!(config.logging.format, "compact");
    assert_eq!(manager.config_path(), Some(config_path.as_path()));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigManager::from_path(&temp_dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[scheduler]\nmax_concurrent_files = 0\n").unwrap();
    assert!(matches!(
        ConfigManager::from_path(&config_path),
        Err(ConfigError::ValidationError(_))
    ));

    fs::write(&config_path, "[scheduler\n").unwrap();
    assert!(matches!(
        ConfigManager::from_path(&config_path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_config_serialization() {
    let config = AtlasConfig::default();
    let toml = toml::to_string(&config).unwrap();
    let from_toml: AtlasConfig = toml::from_str(&toml).unwrap();
    assert_eq!(config, from_toml);
}
