use crate::{FileFacts, FileRecord, ProjectInfo, Result};
use async_trait::async_trait;
use std::path::Path;

/// Extracts declarations and relations from a single file.
///
/// `source` is the content `record.content_hash` was computed from; parsers
/// never read the file themselves. The scheduler drops the returned future when a per-file timeout fires,
/// so implementations must not leave shared state half-written across an
/// `.await`.
#[async_trait]
pub trait FileParser: Send + Sync {
    async fn parse(&self, record: &FileRecord, source: &[u8]) -> Result<FileFacts>;
}

#[async_trait]
pub trait ProjectDetector: Send + Sync {
    async fn detect_type(&self, root: &Path) -> Result<ProjectInfo>;
}

/// Blob storage used to persist the incremental cache.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}
