// ABOUTME: Project type detection from well-known build marker files at the root.
// ABOUTME: The first matching marker wins; names are read from the manifest when available.

use async_trait::async_trait;
use codeatlas_core::{CodeAtlasError, ProjectDetector, ProjectInfo, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct MarkerFileDetector;

impl MarkerFileDetector {
    pub fn new() -> Self {
        Self
    }
}

fn info(project_type: &str, language: &str, confidence: f32) -> ProjectInfo {
    ProjectInfo {
        project_type: project_type.to_string(),
        language: language.to_string(),
        confidence,
        metadata: BTreeMap::new(),
    }
}

async fn read_marker(root: &Path, name: &str) -> Option<String> {
    tokio::fs::read_to_string(root.join(name)).await.ok()
}

fn exists(root: &Path, name: &str) -> bool {
    root.join(name).is_file()
}

fn cargo_name(manifest: &str) -> Option<String> {
    let value: toml::Value = toml::from_str(manifest).ok()?;
    value
        .get("package")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

fn package_json_name(manifest: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(manifest).ok()?;
    value.get("name")?.as_str().map(str::to_string)
}

fn go_module(manifest: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^module\s+(\S+)").ok()?;
    re.captures(manifest).map(|c| c[1].to_string())
}

#[async_trait]
impl ProjectDetector for MarkerFileDetector {
    async fn detect_type(&self, root: &Path) -> Result<ProjectInfo> {
        if !root.is_dir() {
            return Err(CodeAtlasError::InvalidRoot(root.display().to_string()));
        }

        let detected = if let Some(manifest) = read_marker(root, "Cargo.toml").await {
            let mut detected = info("rust", "rust", 0.95);
            if let Some(name) = cargo_name(&manifest) {
                detected.metadata.insert("name".to_string(), name);
            }
            if manifest.contains("[workspace]") {
                detected
                    .metadata
                    .insert("workspace".to_string(), "true".to_string());
            }
            detected
        } else if let Some(manifest) = read_marker(root, "package.json").await {
            let mut detected = if exists(root, "tsconfig.json") {
                info("typescript", "typescript", 0.9)
            } else {
                info("javascript", "javascript", 0.85)
            };
            if let Some(name) = package_json_name(&manifest) {
                detected.metadata.insert("name".to_string(), name);
            }
            detected
        } else if ["pyproject.toml", "setup.py", "requirements.txt"]
            .iter()
            .any(|m| exists(root, m))
        {
            info("python", "python", 0.8)
        } else if let Some(manifest) = read_marker(root, "go.mod").await {
            let mut detected = info("go", "go", 0.9);
            if let Some(module) = go_module(&manifest) {
                detected.metadata.insert("module".to_string(), module);
            }
            detected
        } else if ["pom.xml", "build.gradle", "build.gradle.kts"]
            .iter()
            .any(|m| exists(root, m))
        {
            info("java", "java", 0.8)
        } else {
            ProjectInfo::unknown()
        };

        debug!(
            "Detected {} project ({:.2} confidence) at {:?}",
            detected.project_type, detected.confidence, root
        );
        Ok(detected)
    }
}
