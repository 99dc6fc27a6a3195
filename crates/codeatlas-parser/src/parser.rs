// ABOUTME: Default FileParser backed by tree-sitter grammars.
// ABOUTME: Parsing runs on the blocking pool; dropping the future abandons the result.

use crate::{resolve_local_imports, FactExtractor, LanguageRegistry};
use async_trait::async_trait;
use codeatlas_core::{CodeAtlasError, FileFacts, FileParser, FileRecord, Result};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct TreeSitterParser {
    registry: Arc<LanguageRegistry>,
}

impl TreeSitterParser {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(LanguageRegistry::new()),
        }
    }

    pub fn supports(&self, record: &FileRecord) -> bool {
        self.registry.supports(&record.language)
    }

    /// Synchronous extraction over already loaded source text.
    pub fn parse_source(&self, record: &FileRecord, source: &str) -> Result<FileFacts> {
        let mut parser = self.registry.create_parser(&record.language)?;
        let tree = parser.parse(source, None).ok_or_else(|| {
            CodeAtlasError::Parse(format!("Parser produced no tree for {}", record.relative_path))
        })?;
        if tree.root_node().has_error() {
            debug!("{} contains syntax errors", record.relative_path);
        }

        let extraction =
            FactExtractor::new(record.language.clone(), &record.relative_path, source).extract(&tree);
        let mut facts = extraction.facts;
        facts.dependencies = resolve_local_imports(record, &extraction.local_imports);
        Ok(facts)
    }
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileParser for TreeSitterParser {
    async fn parse(&self, record: &FileRecord, source: &[u8]) -> Result<FileFacts> {
        if !self.supports(record) {
            return Err(CodeAtlasError::Parse(format!(
                "Unsupported language {} for {}",
                record.language, record.relative_path
            )));
        }
        let source = String::from_utf8(source.to_vec()).map_err(|e| {
            CodeAtlasError::Parse(format!("{} is not valid UTF-8: {}", record.relative_path, e))
        })?;

        let parser = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || parser.parse_source(&record, &source))
            .await
            .map_err(|e| CodeAtlasError::Parse(format!("Parse task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discover_files, load_record, read_source, DiscoveryOptions};
    use codeatlas_core::{Language, NodeKind};
    use std::fs;
    use tempfile::TempDir;

    async fn record_for(root: &std::path::Path, relative: &str) -> FileRecord {
        let candidates = discover_files(root, &DiscoveryOptions::default()).unwrap();
        let candidate = candidates
            .iter()
            .find(|c| c.relative_path == relative)
            .unwrap();
        load_record(candidate).await.unwrap()
    }

    async fn parse(record: &FileRecord) -> Result<FileFacts> {
        let source = read_source(record).await.unwrap();
        TreeSitterParser::new().parse(record, &source).await
    }

    #[tokio::test]
    async fn test_parse_resolves_relative_imports() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/lib")).unwrap();
        fs::write(root.join("src/lib/index.ts"), "export function util() {}\n").unwrap();
        fs::write(root.join("src/helper.ts"), "export const h = () => 1;\n").unwrap();
        fs::write(
            root.join("src/app.ts"),
            "import { util } from './lib';\nimport { h } from './helper';\nimport x from 'react';\nexport function main() { util(); }\n",
        )
        .unwrap();

        let record = record_for(root, "src/app.ts").await;
        let facts = parse(&record).await.unwrap();
        assert_eq!(
            facts.dependencies,
            vec!["src/helper.ts".to_string(), "src/lib/index.ts".to_string()]
        );
        assert!(facts.nodes.iter().any(|n| n.name == "main" && n.kind == NodeKind::Function));
    }

    #[tokio::test]
    async fn test_rust_mod_declarations_become_dependencies() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/net")).unwrap();
        fs::write(root.join("src/lib.rs"), "mod config;\nmod net;\nmod missing;\n").unwrap();
        fs::write(root.join("src/config.rs"), "pub struct Config;\n").unwrap();
        fs::write(root.join("src/net/mod.rs"), "pub fn connect() {}\n").unwrap();

        let record = record_for(root, "src/lib.rs").await;
        let facts = parse(&record).await.unwrap();
        assert_eq!(
            facts.dependencies,
            vec!["src/config.rs".to_string(), "src/net/mod.rs".to_string()]
        );
    }

    #[tokio::test]
    async fn test_parses_the_given_source_not_the_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.ts"), "export function before() {}\n").unwrap();
        let record = record_for(root, "a.ts").await;
        fs::write(root.join("a.ts"), "export function after() {}\n").unwrap();

        let facts = TreeSitterParser::new()
            .parse(&record, b"export function before() {}\n")
            .await
            .unwrap();
        assert!(facts.nodes.iter().any(|n| n.name == "before"));
        assert!(!facts.nodes.iter().any(|n| n.name == "after"));
    }

    #[tokio::test]
    async fn test_unsupported_language_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.py"), "x = 1\n").unwrap();
        let mut record = record_for(root, "a.py").await;
        record.language = Language::Other("cobol".into());

        let result = parse(&record).await;
        assert!(matches!(result, Err(CodeAtlasError::Parse(_))));
    }
}
