// ABOUTME: Project-level analysis snapshot and the order-independent builder that folds file facts into it.
// ABOUTME: Resolves relation targets by symbol name and derives structure, complexity and quality summaries.

use chrono::{DateTime, Utc};
use codeatlas_cache::PressureSample;
use codeatlas_core::{CodeNode, FileFacts, FileRecord, NodeId, ProjectInfo, RelationKind};
use codeatlas_resilience::{StrategyKind, StrategyMetrics};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Parse,
    Timeout,
    Io,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Parse => write!(f, "parse"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Io => write!(f, "io"),
        }
    }
}

/// A file excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: FailureReason,
    pub message: String,
}

/// A relation whose target has been looked up across the whole project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRelation {
    pub from: NodeId,
    pub target: String,
    pub kind: RelationKind,
    /// `None` when no node with the target name was found
    pub to: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub root: String,
    pub project: ProjectInfo,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSummary {
    pub total_files: usize,
    pub total_lines: usize,
    pub total_size: u64,
    pub languages: BTreeMap<String, usize>,
    /// Directory (relative, "." for the root) to number of files directly in it
    pub directories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexitySummary {
    pub functions: usize,
    pub classes: usize,
    pub interfaces: usize,
    /// functions x 1 + classes x 2 + interfaces x 0.5
    pub weighted_complexity: f64,
    pub average_cyclomatic: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub declarations: usize,
    pub documented: usize,
    pub documentation_ratio: f64,
    pub complexity_penalty: f64,
    /// 0 to 100, two decimals
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub elapsed_ms: u64,
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_reused: usize,
    pub files_failed: usize,
    pub batches: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub entries_reclaimed: usize,
    pub memory: Option<PressureSample>,
    pub strategies: BTreeMap<StrategyKind, StrategyMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub metadata: SnapshotMetadata,
    pub structure: StructureSummary,
    pub complexity: ComplexitySummary,
    pub quality: QualitySummary,
    pub nodes: Vec<CodeNode>,
    pub relations: Vec<ResolvedRelation>,
    pub failures: Vec<FileFailure>,
    pub performance: Option<PerformanceReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    TimedOut { elapsed_ms: u64 },
}

/// Result of a run. A timed-out outcome still carries everything merged
/// before the deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub snapshot: AnalysisSnapshot,
    pub status: RunStatus,
}

impl AnalysisOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}

#[derive(Debug, Clone)]
struct MergedFile {
    relative_path: String,
    language: String,
    line_count: usize,
    size: u64,
    facts: FileFacts,
}

/// Accumulates per-file results. Adding files in any order yields the same
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    files: Vec<MergedFile>,
    failures: Vec<FileFailure>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn directory_of(relative_path: &str) -> String {
    match Path::new(relative_path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.to_string_lossy().replace('\\', "/")
        }
        _ => ".".to_string(),
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, record: &FileRecord, facts: FileFacts) {
        self.files.push(MergedFile {
            relative_path: record.relative_path.clone(),
            language: record.language.to_string(),
            line_count: record.line_count,
            size: record.size,
            facts,
        });
    }

    pub fn add_failure(&mut self, failure: FileFailure) {
        self.failures.push(failure);
    }

    pub fn merge(&mut self, other: SnapshotBuilder) {
        self.files.extend(other.files);
        self.failures.extend(other.failures);
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn build(
        mut self,
        metadata: SnapshotMetadata,
        performance: Option<PerformanceReport>,
    ) -> AnalysisSnapshot {
        self.files
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));

        let structure = self.structure();

        let mut nodes: Vec<CodeNode> = Vec::new();
        let mut raw_relations = Vec::new();
        for file in self.files {
            nodes.extend(file.facts.nodes);
            raw_relations.extend(file.facts.relations);
        }
        nodes.sort_by(|a, b| {
            (&a.location.file_path, a.location.line, &a.name)
                .cmp(&(&b.location.file_path, b.location.line, &b.name))
        });

        let position: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let mut by_name: HashMap<&str, NodeId> = HashMap::new();
        for node in nodes.iter().filter(|n| n.kind.is_declaration()) {
            by_name.entry(node.name.as_str()).or_insert(node.id);
        }

        let mut relations: Vec<ResolvedRelation> = raw_relations
            .into_iter()
            .map(|relation| ResolvedRelation {
                to: by_name.get(relation.target.as_str()).copied(),
                from: relation.from,
                target: relation.target,
                kind: relation.kind,
            })
            .collect();
        relations.sort_by(|a, b| {
            let pa = position.get(&a.from).copied().unwrap_or(usize::MAX);
            let pb = position.get(&b.from).copied().unwrap_or(usize::MAX);
            (pa, &a.target, a.kind.to_string()).cmp(&(pb, &b.target, b.kind.to_string()))
        });

        let complexity = complexity_of(&nodes);
        let quality = quality_of(&nodes, complexity.average_cyclomatic);

        AnalysisSnapshot {
            metadata,
            structure,
            complexity,
            quality,
            nodes,
            relations,
            failures: self.failures,
            performance,
        }
    }

    fn structure(&self) -> StructureSummary {
        let mut structure = StructureSummary::default();
        for file in &self.files {
            structure.total_files += 1;
            structure.total_lines += file.line_count;
            structure.total_size += file.size;
            *structure.languages.entry(file.language.clone()).or_default() += 1;
            *structure
                .directories
                .entry(directory_of(&file.relative_path))
                .or_default() += 1;
        }
        structure
    }
}

fn complexity_of(nodes: &[CodeNode]) -> ComplexitySummary {
    let functions = nodes.iter().filter(|n| n.kind.is_function_like()).count();
    let classes = nodes.iter().filter(|n| n.kind.is_class_like()).count();
    let interfaces = nodes.iter().filter(|n| n.kind.is_interface_like()).count();

    let measured: Vec<f64> = nodes
        .iter()
        .filter(|n| n.kind.is_function_like())
        .filter_map(|n| n.complexity)
        .map(f64::from)
        .collect();
    let average_cyclomatic = if measured.is_empty() {
        0.0
    } else {
        measured.iter().sum::<f64>() / measured.len() as f64
    };

    ComplexitySummary {
        functions,
        classes,
        interfaces,
        weighted_complexity: functions as f64 + classes as f64 * 2.0 + interfaces as f64 * 0.5,
        average_cyclomatic: round2(average_cyclomatic),
    }
}

fn quality_of(nodes: &[CodeNode], average_cyclomatic: f64) -> QualitySummary {
    let declarations: Vec<&CodeNode> = nodes.iter().filter(|n| n.kind.is_declaration()).collect();
    if declarations.is_empty() {
        return QualitySummary::default();
    }

    let documented = declarations.iter().filter(|n| n.documented).count();
    let documentation_ratio = documented as f64 / declarations.len() as f64;
    let complexity_penalty = (average_cyclomatic / 20.0).min(1.0);
    let score = 100.0 * (0.6 * documentation_ratio + 0.4 * (1.0 - complexity_penalty));

    QualitySummary {
        declarations: declarations.len(),
        documented,
        documentation_ratio: round2(documentation_ratio),
        complexity_penalty: round2(complexity_penalty),
        score: round2(score),
    }
}
