use crate::{Language, Location, NodeId, NodeKind, RelationKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub language: Language,
    pub location: Location,
    pub documented: bool,
    pub complexity: Option<f32>,
}

impl CodeNode {
    /// Ids are derived from file, kind, name and line so that reparsing an
    /// unchanged file yields the same ids as the cached facts.
    pub fn new(name: String, kind: NodeKind, language: Language, location: Location) -> Self {
        let key = format!(
            "{}#{:?}#{}#{}:{}",
            location.file_path, kind, name, location.line, location.column
        );
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()),
            name,
            kind,
            language,
            location,
            documented: false,
            complexity: None,
        }
    }

    pub fn with_documentation(mut self, documented: bool) -> Self {
        self.documented = documented;
        self
    }

    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.complexity = Some(complexity);
        self
    }
}

/// A relationship extracted from a single file. The target is a symbol
/// name, resolved to a node id when facts of all files are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub from: NodeId,
    pub target: String,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(from: NodeId, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            from,
            target: target.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> Location {
        Location {
            file_path: "src/lib.rs".into(),
            line,
            column: 0,
            end_line: None,
        }
    }

    #[test]
    fn node_ids_are_deterministic() {
        let a = CodeNode::new("run".into(), NodeKind::Function, Language::Rust, loc(3));
        let b = CodeNode::new("run".into(), NodeKind::Function, Language::Rust, loc(3));
        let c = CodeNode::new("run".into(), NodeKind::Function, Language::Rust, loc(4));
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }
}
