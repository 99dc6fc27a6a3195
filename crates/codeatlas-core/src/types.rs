use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CodeNode, Relation};

pub type NodeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
    Other(String),
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Some(Language::Rust),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Module,
    Import,
    Variable,
    Type,
    Other(String),
}

impl NodeKind {
    /// Declarations count towards documentation density; imports and
    /// modules do not.
    pub fn is_declaration(&self) -> bool {
        !matches!(self, NodeKind::Import | NodeKind::Module)
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self, NodeKind::Function | NodeKind::Method)
    }

    pub fn is_class_like(&self) -> bool {
        matches!(self, NodeKind::Class | NodeKind::Struct | NodeKind::Enum)
    }

    pub fn is_interface_like(&self) -> bool {
        matches!(self, NodeKind::Interface | NodeKind::Trait)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Calls,
    Imports,
    Extends,
    Implements,
    Contains,
    References,
    Other(String),
}

impl Default for RelationKind {
    fn default() -> Self {
        RelationKind::References
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Calls => "calls",
            RelationKind::Imports => "imports",
            RelationKind::Extends => "extends",
            RelationKind::Implements => "implements",
            RelationKind::Contains => "contains",
            RelationKind::References => "references",
            RelationKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "calls" => Ok(RelationKind::Calls),
            "imports" => Ok(RelationKind::Imports),
            "extends" => Ok(RelationKind::Extends),
            "implements" => Ok(RelationKind::Implements),
            "contains" => Ok(RelationKind::Contains),
            "references" => Ok(RelationKind::References),
            other => Ok(RelationKind::Other(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub end_line: Option<u32>,
}

/// A discovered source file. Produced once per scan and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Forward-slash path relative to the project root; the cache key.
    pub relative_path: String,
    pub size: u64,
    pub line_count: usize,
    pub modified: DateTime<Utc>,
    pub content_hash: String,
    pub language: Language,
}

/// Everything a parser extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFacts {
    pub nodes: Vec<CodeNode>,
    pub relations: Vec<Relation>,
    /// Relative paths of files this file depends on.
    pub dependencies: Vec<String>,
}

impl FileFacts {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_type: String,
    pub language: String,
    pub confidence: f32,
    pub metadata: BTreeMap<String, String>,
}

impl ProjectInfo {
    pub fn unknown() -> Self {
        Self {
            project_type: "unknown".to_string(),
            language: "unknown".to_string(),
            confidence: 0.0,
            metadata: BTreeMap::new(),
        }
    }
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Lowercase hex SHA-256 of the given bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
