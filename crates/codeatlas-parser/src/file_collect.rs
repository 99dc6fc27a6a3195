use chrono::{DateTime, Utc};
use codeatlas_core::{content_hash, CodeAtlasError, FileRecord, Language, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::LanguageRegistry;

/// Directory names that are never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".codeatlas",
];

/// Configuration for file discovery
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub max_depth: Option<usize>,
    /// Globs over the relative path; when non-empty only matching files are kept
    pub include: Vec<String>,
    /// Plain names match any path component, anything else is a glob over the relative path
    pub exclude: Vec<String>,
}

/// A discovered source file that has not been read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub relative_path: String,
    pub language: Language,
    pub size: u64,
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{', '/'])
}

fn build_globset<'p>(patterns: impl IntoIterator<Item = &'p String>) -> Result<Option<GlobSet>> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| CodeAtlasError::Config(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| CodeAtlasError::Config(format!("Invalid glob set: {}", e)))
}

/// Forward-slash path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` and return every supported source file, sorted by relative path.
///
/// Excluded directories are pruned in the walker itself so their contents
/// are never visited.
pub fn discover_files(root: &Path, options: &DiscoveryOptions) -> Result<Vec<Candidate>> {
    if !root.is_dir() {
        return Err(CodeAtlasError::InvalidRoot(root.display().to_string()));
    }
    info!("Discovering source files under {:?}", root);

    let excluded_names: Vec<String> = DEFAULT_EXCLUDED_DIRS
        .iter()
        .map(|d| d.to_string())
        .chain(options.exclude.iter().filter(|p| !is_glob(p)).cloned())
        .collect();
    let exclude_globs = build_globset(options.exclude.iter().filter(|p| is_glob(p)))?;
    let include_globs = build_globset(options.include.iter())?;

    let prune_root = root.to_path_buf();
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .parents(false)
        .max_depth(options.max_depth)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if excluded_names.iter().any(|n| *n == name) {
                return false;
            }
            match &exclude_globs {
                Some(globs) => !globs.is_match(relative_path(&prune_root, entry.path())),
                None => true,
            }
        });

    let registry = LanguageRegistry::new();
    let mut candidates = Vec::new();
    let mut skipped = 0usize;

    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walker error: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let Some(language) = registry.detect(path) else {
            skipped += 1;
            continue;
        };
        let relative = relative_path(root, path);
        if let Some(globs) = &include_globs {
            if !globs.is_match(&relative) {
                skipped += 1;
                continue;
            }
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        candidates.push(Candidate {
            path: path.to_path_buf(),
            relative_path: relative,
            language,
            size,
        });
    }

    candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    info!(
        "Discovery complete: {} source files, {} skipped",
        candidates.len(),
        skipped
    );
    Ok(candidates)
}

/// Read a candidate and produce its record with a fresh content hash.
pub async fn load_record(candidate: &Candidate) -> Result<FileRecord> {
    let bytes = tokio::fs::read(&candidate.path).await?;
    let metadata = tokio::fs::metadata(&candidate.path).await?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let line_count = if bytes.is_empty() {
        0
    } else {
        bytes.iter().filter(|b| **b == b'\n').count() + usize::from(!bytes.ends_with(b"\n"))
    };
    debug!("Loaded {} ({} bytes)", candidate.relative_path, bytes.len());

    Ok(FileRecord {
        path: candidate.path.clone(),
        relative_path: candidate.relative_path.clone(),
        size: bytes.len() as u64,
        line_count,
        modified,
        content_hash: content_hash(&bytes),
        language: candidate.language.clone(),
    })
}

/// Read the content `record` was hashed from. Fails with `InvalidData` when
/// the file changed after the scan, so facts are never cached under a hash
/// they were not computed from.
pub async fn read_source(record: &FileRecord) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(&record.path).await?;
    if content_hash(&bytes) != record.content_hash {
        return Err(CodeAtlasError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} changed since it was scanned", record.relative_path),
        )));
    }
    Ok(bytes)
}
