use codeatlas_core::{FileParser, Language, NodeKind, ProjectDetector};
use codeatlas_parser::{
    discover_files, load_record, read_source, DiscoveryOptions, MarkerFileDetector,
    TreeSitterParser,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_mixed_language_tree() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "pyproject.toml", "[project]\nname = \"tool\"\n");
    write(
        root,
        "tool/__init__.py",
        "from .core import run\n",
    );
    write(
        root,
        "tool/core.py",
        "def run(x):\n    \"\"\"Run it.\"\"\"\n    if x:\n        return 1\n    return 0\n",
    );
    write(root, "web/index.js", "function boot() { return 1; }\n");
    write(root, "node_modules/dep/index.js", "function hidden() {}\n");

    let info = MarkerFileDetector::new().detect_type(root).await.unwrap();
    assert_eq!(info.project_type, "python");

    let candidates = discover_files(root, &DiscoveryOptions::default()).unwrap();
    let paths: Vec<&str> = candidates.iter().map(|c| c.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["tool/__init__.py", "tool/core.py", "web/index.js"]);

    let parser = TreeSitterParser::new();
    let init = load_record(&candidates[0]).await.unwrap();
    let facts = parser.parse(&init, &read_source(&init).await.unwrap()).await.unwrap();
    assert_eq!(facts.dependencies, vec!["tool/core.py".to_string()]);

    let core = load_record(&candidates[1]).await.unwrap();
    assert_eq!(core.language, Language::Python);
    let facts = parser.parse(&core, &read_source(&core).await.unwrap()).await.unwrap();
    let run = facts.nodes.iter().find(|n| n.name == "run").unwrap();
    assert_eq!(run.kind, NodeKind::Function);
    assert!(run.documented);
    assert_eq!(run.complexity, Some(2.0));

    let js = load_record(&candidates[2]).await.unwrap();
    let facts = parser.parse(&js, &read_source(&js).await.unwrap()).await.unwrap();
    assert!(facts.nodes.iter().any(|n| n.name == "boot"));
    assert!(facts.dependencies.is_empty());
}
