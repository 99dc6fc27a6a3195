use codeatlas_cache::{CacheEntry, IncrementalCache, PersistedCache, CACHE_FORMAT_VERSION};
use chrono::{TimeZone, Utc};
use codeatlas_core::{CacheSettings, FileFacts, FileRecord, Language, StrategyConfig};
use codeatlas_resilience::{MetricsRegistry, StrategyContext, StrategySelector};
use std::sync::Arc;
use tempfile::TempDir;

fn facts(deps: &[&str]) -> FileFacts {
    FileFacts {
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        ..FileFacts::default()
    }
}

fn cache_at(root: &std::path::Path) -> IncrementalCache {
    let selector = StrategySelector::new(&StrategyConfig::default(), Arc::new(MetricsRegistry::new()));
    IncrementalCache::for_root(
        root,
        &CacheSettings::default(),
        selector.select(&StrategyContext::Io),
    )
}

#[tokio::test]
async fn test_cache_survives_restart_on_disk() {
    let temp = TempDir::new().unwrap();

    let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let app = FileRecord {
        path: temp.path().join("src/app.ts"),
        relative_path: "src/app.ts".to_string(),
        size: 42,
        line_count: 3,
        modified,
        content_hash: "H-app".to_string(),
        language: Language::TypeScript,
    };

    let cache = cache_at(temp.path());
    cache.set_cache("src/util.ts", CacheEntry::new("H-util", Language::TypeScript, facts(&[])));
    cache.set_cache("src/app.ts", CacheEntry::for_record(&app, facts(&["src/util.ts"])));
    cache.persist_cache().await.unwrap();

    let raw = std::fs::read(temp.path().join(".codeatlas/cache.json")).unwrap();
    let document: PersistedCache = serde_json::from_slice(&raw).unwrap();
    assert_eq!(document.version, CACHE_FORMAT_VERSION);
    assert_eq!(
        document.entries.keys().collect::<Vec<_>>(),
        vec!["src/app.ts", "src/util.ts"]
    );
    assert_eq!(document.entries["src/app.ts"].modified, modified);
    assert_eq!(document.entries["src/app.ts"].dependencies, vec!["src/util.ts"]);

    let reopened = cache_at(temp.path());
    assert_eq!(reopened.load_cache().await, 2);
    assert!(reopened.validate_file_hash("src/app.ts", "H-app"));
    assert!(!reopened.validate_file_hash("src/app.ts", "H-other"));
    let restored = reopened.get_cache("src/app.ts").unwrap();
    assert_eq!(restored.modified, modified);
    assert_eq!(restored.dependencies(), ["src/util.ts".to_string()]);
    assert_eq!(
        reopened.invalidate_dependents("src/util.ts"),
        vec!["src/app.ts".to_string()]
    );
}

#[tokio::test]
async fn test_corrupt_document_starts_empty() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join(".codeatlas")).unwrap();
    std::fs::write(temp.path().join(".codeatlas/cache.json"), "{\"version\": ").unwrap();

    let cache = cache_at(temp.path());
    assert_eq!(cache.load_cache().await, 0);
    assert!(cache.is_empty());
}
