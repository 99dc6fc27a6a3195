// ABOUTME: Walks a tree-sitter syntax tree and extracts declarations, calls and imports.
// ABOUTME: Relative imports are resolved against the project tree to become file dependencies.

use crate::cyclomatic_complexity;
use codeatlas_core::{
    CodeNode, FileFacts, FileRecord, Language, Location, NodeId, NodeKind, Relation, RelationKind,
};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tree_sitter::{Node, Tree};

/// An import that refers to another file of the same project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalImport {
    /// `./x` or `../x` specifier (JavaScript / TypeScript)
    Script(String),
    /// `from .pkg import x`: number of leading dots and the dotted remainder
    Python { dots: usize, module: String },
    /// `mod name;`
    RustModule(String),
}

/// Facts of one file plus the imports still to be resolved to paths.
#[derive(Debug, Default)]
pub struct Extraction {
    pub facts: FileFacts,
    pub local_imports: Vec<LocalImport>,
}

pub struct FactExtractor<'a> {
    language: Language,
    file_path: &'a str,
    source: &'a [u8],
    extraction: Extraction,
}

impl<'a> FactExtractor<'a> {
    pub fn new(language: Language, file_path: &'a str, source: &'a str) -> Self {
        Self {
            language,
            file_path,
            source: source.as_bytes(),
            extraction: Extraction::default(),
        }
    }

    pub fn extract(mut self, tree: &Tree) -> Extraction {
        let root = tree.root_node();
        let module = CodeNode::new(
            self.file_path.to_string(),
            NodeKind::Module,
            self.language.clone(),
            self.location(root),
        );
        let module_id = module.id;
        self.extraction.facts.nodes.push(module);
        self.visit(root, module_id, false);
        self.extraction
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn location(&self, node: Node<'_>) -> Location {
        let start = node.start_position();
        Location {
            file_path: self.file_path.to_string(),
            line: start.row as u32 + 1,
            column: start.column as u32,
            end_line: Some(node.end_position().row as u32 + 1),
        }
    }

    fn relate(&mut self, from: NodeId, target: impl Into<String>, kind: RelationKind) {
        let target = target.into();
        if !target.is_empty() {
            self.extraction
                .facts
                .relations
                .push(Relation::new(from, target, kind));
        }
    }

    fn visit(&mut self, node: Node<'_>, scope: NodeId, in_type: bool) {
        let mut child_scope = scope;
        if let Some(kind) = self.declaration_kind(node, in_type) {
            if let Some(name) = self.declaration_name(node) {
                let mut declared = CodeNode::new(
                    name.to_string(),
                    kind.clone(),
                    self.language.clone(),
                    self.location(node),
                )
                .with_documentation(self.is_documented(node));
                if kind.is_function_like() {
                    declared = declared.with_complexity(cyclomatic_complexity(node));
                }
                let id = declared.id;
                self.extraction.facts.nodes.push(declared);
                self.heritage(node, id);
                if kind.is_function_like() || kind.is_class_like() || kind.is_interface_like() {
                    child_scope = id;
                }
            }
        }
        self.references(node, scope);

        let child_in_type = match node.kind() {
            "impl_item" | "trait_item" | "class_definition" => true,
            "function_item" | "function_definition" => false,
            _ => in_type,
        };
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(child, child_scope, child_in_type);
        }
    }

    fn declaration_kind(&self, node: Node<'_>, in_type: bool) -> Option<NodeKind> {
        let kind = node.kind();
        match self.language {
            Language::Rust => match kind {
                "function_item" if in_type => Some(NodeKind::Method),
                "function_item" => Some(NodeKind::Function),
                "function_signature_item" => Some(NodeKind::Method),
                "struct_item" | "union_item" => Some(NodeKind::Struct),
                "enum_item" => Some(NodeKind::Enum),
                "trait_item" => Some(NodeKind::Trait),
                "mod_item" => Some(NodeKind::Module),
                "type_item" => Some(NodeKind::Type),
                "const_item" | "static_item" => Some(NodeKind::Variable),
                _ => None,
            },
            Language::TypeScript | Language::Tsx | Language::JavaScript => match kind {
                "function_declaration" | "generator_function_declaration" => {
                    Some(NodeKind::Function)
                }
                "method_definition" => Some(NodeKind::Method),
                "class_declaration" | "abstract_class_declaration" => Some(NodeKind::Class),
                "interface_declaration" => Some(NodeKind::Interface),
                "enum_declaration" => Some(NodeKind::Enum),
                "type_alias_declaration" => Some(NodeKind::Type),
                "variable_declarator" => node
                    .child_by_field_name("value")
                    .filter(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
                    .map(|_| NodeKind::Function),
                _ => None,
            },
            Language::Python => match kind {
                "function_definition" if in_type => Some(NodeKind::Method),
                "function_definition" => Some(NodeKind::Function),
                "class_definition" => Some(NodeKind::Class),
                _ => None,
            },
            Language::Go => match kind {
                "function_declaration" => Some(NodeKind::Function),
                "method_declaration" => Some(NodeKind::Method),
                "type_spec" => Some(match node.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") => NodeKind::Struct,
                    Some("interface_type") => NodeKind::Interface,
                    _ => NodeKind::Type,
                }),
                _ => None,
            },
            Language::Other(_) => None,
        }
    }

    fn declaration_name(&self, node: Node<'_>) -> Option<&'a str> {
        node.child_by_field_name("name")
            .map(|name| self.text(name))
            .filter(|name| !name.is_empty())
    }

    fn is_documented(&self, node: Node<'_>) -> bool {
        match self.language {
            Language::Rust => {
                let mut prev = node.prev_named_sibling();
                while let Some(sibling) = prev {
                    match sibling.kind() {
                        "attribute_item" => prev = sibling.prev_named_sibling(),
                        "line_comment" => {
                            let text = self.text(sibling);
                            return text.starts_with("///") || text.starts_with("//!");
                        }
                        "block_comment" => return self.text(sibling).starts_with("/**"),
                        _ => return false,
                    }
                }
                false
            }
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                let mut anchor = node;
                if node.kind() == "variable_declarator" {
                    if let Some(declaration) = node.parent() {
                        anchor = declaration;
                    }
                }
                if let Some(parent) = anchor.parent() {
                    if parent.kind() == "export_statement" {
                        anchor = parent;
                    }
                }
                anchor
                    .prev_named_sibling()
                    .filter(|s| s.kind() == "comment")
                    .map(|s| self.text(s).starts_with("/**"))
                    .unwrap_or(false)
            }
            Language::Python => node
                .child_by_field_name("body")
                .and_then(|body| body.named_child(0))
                .filter(|first| first.kind() == "expression_statement")
                .and_then(|statement| statement.named_child(0))
                .map(|expr| expr.kind() == "string")
                .unwrap_or(false),
            Language::Go => {
                let anchor = match node.parent() {
                    Some(parent) if parent.kind() == "type_declaration" => parent,
                    _ => node,
                };
                anchor
                    .prev_named_sibling()
                    .filter(|s| s.kind() == "comment")
                    .map(|s| s.end_position().row + 1 == anchor.start_position().row)
                    .unwrap_or(false)
            }
            Language::Other(_) => false,
        }
    }

    fn heritage(&mut self, node: Node<'_>, id: NodeId) {
        match node.kind() {
            "class_declaration" | "abstract_class_declaration" => {
                let mut cursor = node.walk();
                let clauses: Vec<Node<'_>> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "class_heritage")
                    .collect();
                for clause in clauses {
                    self.class_heritage(clause, id);
                }
            }
            "class_definition" => {
                if let Some(bases) = node.child_by_field_name("superclasses") {
                    let mut cursor = bases.walk();
                    let names: Vec<&str> = bases
                        .named_children(&mut cursor)
                        .filter(|b| matches!(b.kind(), "identifier" | "attribute"))
                        .map(|b| symbol_name(self.text(b)))
                        .collect();
                    for name in names {
                        self.relate(id, name, RelationKind::Extends);
                    }
                }
            }
            _ => {}
        }
    }

    fn class_heritage(&mut self, clause: Node<'_>, id: NodeId) {
        let mut cursor = clause.walk();
        let parts: Vec<Node<'_>> = clause.named_children(&mut cursor).collect();
        for part in parts {
            let kind = match part.kind() {
                "extends_clause" => RelationKind::Extends,
                "implements_clause" => RelationKind::Implements,
                // JavaScript: `extends <expression>` without a clause node
                _ => {
                    let name = symbol_name(self.text(part));
                    self.relate(id, name, RelationKind::Extends);
                    continue;
                }
            };
            let mut inner = part.walk();
            let names: Vec<&str> = part
                .named_children(&mut inner)
                .filter(|n| n.kind() != "type_arguments")
                .map(|n| symbol_name(self.text(n)))
                .collect();
            for name in names {
                self.relate(id, name, kind.clone());
            }
        }
    }

    fn references(&mut self, node: Node<'_>, scope: NodeId) {
        let language = self.language.clone();
        match (node.kind(), &language) {
            ("call_expression", _) | ("call", Language::Python) => {
                let callee = node.child_by_field_name("function").map(|f| {
                    if f.kind() == "generic_function" {
                        f.child_by_field_name("function").unwrap_or(f)
                    } else {
                        f
                    }
                });
                if let Some(callee) = callee {
                    let name = symbol_name(self.text(callee));
                    if is_identifier(name) {
                        self.relate(scope, name, RelationKind::Calls);
                    }
                }
            }
            ("use_declaration", Language::Rust) => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    let target = match argument.kind() {
                        "scoped_identifier" => argument
                            .child_by_field_name("name")
                            .map(|n| self.text(n))
                            .unwrap_or_else(|| self.text(argument)),
                        _ => self.text(argument),
                    };
                    self.relate(scope, target, RelationKind::Imports);
                }
            }
            ("mod_item", Language::Rust) => {
                if node.child_by_field_name("body").is_none() {
                    if let Some(name) = self.declaration_name(node) {
                        self.extraction
                            .local_imports
                            .push(LocalImport::RustModule(name.to_string()));
                    }
                }
            }
            ("import_statement", Language::Python) => {
                let mut cursor = node.walk();
                let modules: Vec<&str> = node
                    .named_children(&mut cursor)
                    .filter_map(|child| match child.kind() {
                        "dotted_name" => Some(self.text(child)),
                        "aliased_import" => child.child_by_field_name("name").map(|n| self.text(n)),
                        _ => None,
                    })
                    .collect();
                for module in modules {
                    self.relate(scope, module, RelationKind::Imports);
                }
            }
            ("import_from_statement", Language::Python) => {
                if let Some(module) = node.child_by_field_name("module_name") {
                    let module = self.text(module);
                    self.relate(scope, module, RelationKind::Imports);
                    let dots = module.chars().take_while(|c| *c == '.').count();
                    if dots > 0 {
                        self.extraction.local_imports.push(LocalImport::Python {
                            dots,
                            module: module[dots..].to_string(),
                        });
                    }
                }
            }
            ("import_statement", _) | ("export_statement", _) => {
                if let Some(source) = node.child_by_field_name("source") {
                    let spec = unquote(self.text(source));
                    self.relate(scope, spec, RelationKind::Imports);
                    if spec.starts_with('.') {
                        self.extraction
                            .local_imports
                            .push(LocalImport::Script(spec.to_string()));
                    }
                }
            }
            ("import_spec", Language::Go) => {
                if let Some(path) = node.child_by_field_name("path") {
                    let spec = unquote(self.text(path));
                    self.relate(scope, spec, RelationKind::Imports);
                }
            }
            _ => {}
        }
    }
}

/// Last segment of a qualified name, without generic arguments.
fn symbol_name(text: &str) -> &str {
    let text = text.split(['<', '(']).next().unwrap_or(text);
    text.rsplit(['.', ':']).next().unwrap_or(text).trim()
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// Lexically normalize a relative path. `None` if it climbs above the root.
fn normalize(path: &Path) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

/// Resolve local imports of `record` to project-relative paths of files that
/// exist on disk. Sorted, deduplicated, never containing the file itself.
pub fn resolve_local_imports(record: &FileRecord, imports: &[LocalImport]) -> Vec<String> {
    let relative = Path::new(&record.relative_path);
    let depth = relative.components().count();
    let Some(root) = record.path.ancestors().nth(depth) else {
        return Vec::new();
    };
    let dir = relative.parent().unwrap_or(Path::new(""));

    let mut resolved = BTreeSet::new();
    for import in imports {
        let candidates: Vec<PathBuf> = match import {
            LocalImport::Script(spec) => {
                let base = dir.join(spec);
                let mut candidates = vec![base.clone()];
                for ext in ["ts", "tsx", "js", "jsx", "mjs"] {
                    candidates.push(PathBuf::from(format!("{}.{}", base.display(), ext)));
                }
                for index in ["index.ts", "index.tsx", "index.js"] {
                    candidates.push(base.join(index));
                }
                candidates
            }
            LocalImport::Python { dots, module } => {
                if module.is_empty() {
                    continue;
                }
                let mut base = dir.to_path_buf();
                for _ in 1..*dots {
                    base.push("..");
                }
                let module_path = base.join(module.replace('.', "/"));
                vec![
                    PathBuf::from(format!("{}.py", module_path.display())),
                    module_path.join("__init__.py"),
                ]
            }
            LocalImport::RustModule(name) => {
                let file_name = relative.file_name().and_then(|f| f.to_str()).unwrap_or("");
                let module_dir = if matches!(file_name, "lib.rs" | "main.rs" | "mod.rs") {
                    dir.to_path_buf()
                } else {
                    let stem = relative.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                    dir.join(stem)
                };
                vec![
                    module_dir.join(format!("{}.rs", name)),
                    module_dir.join(name).join("mod.rs"),
                ]
            }
        };

        let found = candidates
            .iter()
            .filter_map(|candidate| normalize(candidate))
            .find(|candidate| !candidate.is_empty() && root.join(candidate).is_file());
        if let Some(path) = found {
            if path != record.relative_path {
                resolved.insert(path);
            }
        }
    }
    resolved.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LanguageRegistry;

    fn extract(language: Language, path: &str, code: &str) -> Extraction {
        let mut parser = LanguageRegistry::new().create_parser(&language).unwrap();
        let tree = parser.parse(code, None).unwrap();
        FactExtractor::new(language, path, code).extract(&tree)
    }

    fn find<'n>(facts: &'n FileFacts, name: &str) -> &'n CodeNode {
        facts
            .nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {}", name))
    }

    #[test]
    fn test_rust_declarations_docs_and_calls() {
        let code = r#"
use std::collections::HashMap;

/// A point.
#[derive(Debug)]
pub struct Point { x: i32 }

trait Shape { fn area(&self) -> f64; }

impl Point {
    pub fn new() -> Self { helper(); Point { x: 0 } }
}

// plain comment
fn helper() {}
"#;
        let facts = extract(Language::Rust, "src/point.rs", code).facts;
        assert_eq!(facts.nodes[0].kind, NodeKind::Module);
        assert_eq!(find(&facts, "Point").kind, NodeKind::Struct);
        assert!(find(&facts, "Point").documented);
        assert_eq!(find(&facts, "Shape").kind, NodeKind::Trait);
        assert_eq!(find(&facts, "area").kind, NodeKind::Method);
        assert_eq!(find(&facts, "new").kind, NodeKind::Method);
        assert_eq!(find(&facts, "new").location.line, 11);
        assert_eq!(find(&facts, "helper").kind, NodeKind::Function);
        assert!(!find(&facts, "helper").documented);
        assert_eq!(find(&facts, "helper").complexity, Some(1.0));

        let new_id = find(&facts, "new").id;
        assert!(facts
            .relations
            .iter()
            .any(|r| r.from == new_id && r.target == "helper" && r.kind == RelationKind::Calls));
        assert!(facts
            .relations
            .iter()
            .any(|r| r.target == "HashMap" && r.kind == RelationKind::Imports));
    }

    #[test]
    fn test_typescript_classes_and_imports() {
        let code = r#"
import { Base } from "./base";
import * as fs from "fs";

/** Service doc */
export class UserService extends Base implements Store {
    load(id: string) { return fetchUser(id); }
}

export const render = (x: number) => x * 2;

interface Store {}
"#;
        let extraction = extract(Language::TypeScript, "src/service.ts", code);
        let facts = &extraction.facts;
        let service = find(facts, "UserService");
        assert_eq!(service.kind, NodeKind::Class);
        assert!(service.documented);
        assert_eq!(find(facts, "load").kind, NodeKind::Method);
        assert_eq!(find(facts, "render").kind, NodeKind::Function);
        assert_eq!(find(facts, "Store").kind, NodeKind::Interface);

        assert!(facts.relations.iter().any(|r| r.from == service.id
            && r.target == "Base"
            && r.kind == RelationKind::Extends));
        assert!(facts.relations.iter().any(|r| r.from == service.id
            && r.target == "Store"
            && r.kind == RelationKind::Implements));
        assert!(facts
            .relations
            .iter()
            .any(|r| r.target == "fetchUser" && r.kind == RelationKind::Calls));
        assert_eq!(
            extraction.local_imports,
            vec![LocalImport::Script("./base".to_string())]
        );
    }

    #[test]
    fn test_python_docstrings_and_relative_imports() {
        let code = r#"
from .models import User
import os

class Repo(Base):
    """Stores users."""

    def get(self, key):
        return lookup(key)

def undocumented():
    pass
"#;
        let extraction = extract(Language::Python, "app/repo.py", code);
        let facts = &extraction.facts;
        assert!(find(facts, "Repo").documented);
        assert_eq!(find(facts, "get").kind, NodeKind::Method);
        assert_eq!(find(facts, "undocumented").kind, NodeKind::Function);
        assert!(!find(facts, "undocumented").documented);
        assert!(facts
            .relations
            .iter()
            .any(|r| r.target == "Base" && r.kind == RelationKind::Extends));
        assert_eq!(
            extraction.local_imports,
            vec![LocalImport::Python {
                dots: 1,
                module: "models".to_string()
            }]
        );
    }

    #[test]
    fn test_go_types_and_methods() {
        let code = r#"
package store

import "fmt"

// Store keeps things.
type Store struct{}

type Reader interface{ Read() }

func (s *Store) Get() { fmt.Println("x") }

func New() *Store { return &Store{} }
"#;
        let facts = extract(Language::Go, "store/store.go", code).facts;
        assert_eq!(find(&facts, "Store").kind, NodeKind::Struct);
        assert!(find(&facts, "Store").documented);
        assert_eq!(find(&facts, "Reader").kind, NodeKind::Interface);
        assert_eq!(find(&facts, "Get").kind, NodeKind::Method);
        assert_eq!(find(&facts, "New").kind, NodeKind::Function);
        assert!(facts
            .relations
            .iter()
            .any(|r| r.target == "fmt" && r.kind == RelationKind::Imports));
        assert!(facts
            .relations
            .iter()
            .any(|r| r.target == "Println" && r.kind == RelationKind::Calls));
    }

    #[test]
    fn test_symbol_name_and_normalize() {
        assert_eq!(symbol_name("self.client.fetch"), "fetch");
        assert_eq!(symbol_name("std::mem::take"), "take");
        assert_eq!(symbol_name("Vec<String>"), "Vec");
        assert_eq!(normalize(Path::new("src/a/../b/./c.ts")).as_deref(), Some("src/b/c.ts"));
        assert_eq!(normalize(Path::new("../outside.ts")), None);
    }
}
