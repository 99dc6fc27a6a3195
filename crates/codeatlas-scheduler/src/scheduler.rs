// ABOUTME: Runs one analysis over a source tree: discovery, change detection, batched parsing, aggregation.
// ABOUTME: Bounded by a batch-sized JoinSet, a per-file timeout and an overall deadline that keeps partial results.

use crate::progress::ProgressReporter;
use crate::{
    AnalysisOutcome, AnalysisSnapshot, FailureReason, FileFailure, PerformanceReport,
    ProgressObserver, ProgressUpdate, RunOptions, RunStatus, SnapshotBuilder, SnapshotMetadata,
};
use chrono::Utc;
use codeatlas_cache::{
    CacheEntry, IncrementalCache, MemoryGovernor, MemoryPressure, PressureSample, Reclaimable,
};
use codeatlas_core::{
    AtlasConfig, CodeAtlasError, FileFacts, FileParser, FileRecord, ProjectDetector, ProjectInfo,
    Result,
};
use codeatlas_parser::{
    discover_files, load_record, read_source, Candidate, MarkerFileDetector, TreeSitterParser,
};
use codeatlas_resilience::{
    operation, ExecutionStrategy, MetricsRegistry, StrategyContext, StrategySelector,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, info, instrument, warn};

enum FileOutcome {
    Reused { record: FileRecord, facts: FileFacts },
    Parsed { record: FileRecord, facts: FileFacts },
    Failed(FileFailure),
}

/// How far a run got before returning.
enum Phase {
    Finished,
    Expired,
}

#[derive(Default)]
struct RunState {
    builder: SnapshotBuilder,
    discovered: usize,
    processed: usize,
    parsed: usize,
    reused: usize,
    failed: usize,
    misses: usize,
    batches: usize,
    reclaimed: usize,
    last_sample: Option<PressureSample>,
}

impl RunState {
    fn fail(&mut self, failure: FileFailure) {
        warn!(
            "Skipping {} ({}): {}",
            failure.path, failure.reason, failure.message
        );
        self.failed += 1;
        self.builder.add_failure(failure);
    }

    fn absorb(&mut self, outcome: FileOutcome) {
        self.processed += 1;
        match outcome {
            FileOutcome::Reused { record, facts } => {
                self.reused += 1;
                self.builder.add_file(&record, facts);
            }
            FileOutcome::Parsed { record, facts } => {
                self.parsed += 1;
                self.misses += 1;
                self.builder.add_file(&record, facts);
            }
            FileOutcome::Failed(failure) => {
                self.misses += 1;
                self.fail(failure);
            }
        }
    }

    fn performance(&self, elapsed: Duration, selector: &StrategySelector) -> PerformanceReport {
        let lookups = self.reused + self.misses;
        PerformanceReport {
            elapsed_ms: elapsed.as_millis() as u64,
            files_discovered: self.discovered,
            files_parsed: self.parsed,
            files_reused: self.reused,
            files_failed: self.failed,
            batches: self.batches,
            cache_hits: self.reused,
            cache_misses: self.misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                self.reused as f64 / lookups as f64
            },
            entries_reclaimed: self.reclaimed,
            memory: self.last_sample.clone(),
            strategies: selector.metrics().snapshot(),
        }
    }
}

fn failure_reason(error: &CodeAtlasError) -> FailureReason {
    match error {
        CodeAtlasError::Timeout { .. } => FailureReason::Timeout,
        CodeAtlasError::Io(_) => FailureReason::Io,
        _ => FailureReason::Parse,
    }
}

/// Analyse one file: reuse the cached facts when the hash still matches,
/// otherwise read and parse it under the per-file timeout and cache the result.
async fn process_file(
    record: FileRecord,
    cache: Arc<IncrementalCache>,
    parser: Arc<dyn FileParser>,
    strategy: Arc<ExecutionStrategy>,
    timeout_per_file: Duration,
) -> FileOutcome {
    let path = record.relative_path.clone();
    if cache.validate_file_hash(&path, &record.content_hash) {
        if let Some(entry) = cache.get_cache(&path) {
            debug!("Cache hit for {}", path);
            return FileOutcome::Reused {
                facts: entry.facts,
                record,
            };
        }
    }

    let parser_ref = parser.as_ref();
    let record_ref = &record;
    let attempt = async {
        let source = read_source(record_ref).await?;
        let source_ref = source.as_slice();
        strategy
            .execute(operation(move || parser_ref.parse(record_ref, source_ref)))
            .await
    };
    let result = timeout(timeout_per_file, attempt).await;

    let facts = match result {
        Err(_) => {
            return FileOutcome::Failed(FileFailure {
                path,
                reason: FailureReason::Timeout,
                message: format!("parse exceeded {}ms", timeout_per_file.as_millis()),
            })
        }
        Ok(Err(e)) => {
            return FileOutcome::Failed(FileFailure {
                path,
                reason: failure_reason(&e),
                message: e.to_string(),
            })
        }
        Ok(Ok(facts)) => facts,
    };

    let entry = CacheEntry::for_record(&record, facts.clone());
    if let Some(previous) = cache.set_cache(&path, entry) {
        if previous.dependencies() != facts.dependencies.as_slice() {
            let affected = cache.invalidate_dependents(&path);
            debug!(
                "Dependencies of {} changed, invalidated {} dependents",
                path,
                affected.len()
            );
        }
    }
    debug!("Parsed {} ({} nodes)", path, facts.nodes.len());
    FileOutcome::Parsed { record, facts }
}

pub struct AnalysisScheduler {
    parser: Arc<dyn FileParser>,
    detector: Arc<dyn ProjectDetector>,
    cache: Arc<IncrementalCache>,
    selector: Arc<StrategySelector>,
    governor: Arc<MemoryGovernor>,
    observer: Option<ProgressObserver>,
}

impl AnalysisScheduler {
    pub fn new(
        parser: Arc<dyn FileParser>,
        detector: Arc<dyn ProjectDetector>,
        cache: Arc<IncrementalCache>,
        selector: Arc<StrategySelector>,
        governor: Arc<MemoryGovernor>,
    ) -> Self {
        Self {
            parser,
            detector,
            cache,
            selector,
            governor,
            observer: None,
        }
    }

    /// Default collaborators: tree-sitter parser, marker-file detector, and a
    /// cache persisted under `root`.
    pub fn for_root(root: &Path, config: &AtlasConfig) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let selector = Arc::new(
            StrategySelector::new(&config.strategies, metrics)
                .with_parser_timeout(Duration::from_millis(config.scheduler.timeout_per_file_ms)),
        );
        let cache = Arc::new(IncrementalCache::for_root(
            root,
            &config.cache,
            selector.select(&StrategyContext::Io),
        ));
        Self::new(
            Arc::new(TreeSitterParser::new()),
            Arc::new(MarkerFileDetector::new()),
            cache,
            selector,
            Arc::new(MemoryGovernor::new(config.memory.clone())),
        )
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cache(&self) -> &Arc<IncrementalCache> {
        &self.cache
    }

    pub fn selector(&self) -> &Arc<StrategySelector> {
        &self.selector
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    #[instrument(skip(self, root, options), fields(root = %root.display()))]
    pub async fn run(&self, root: &Path, options: &RunOptions) -> Result<AnalysisOutcome> {
        if !root.is_dir() {
            return Err(CodeAtlasError::InvalidRoot(root.display().to_string()));
        }
        let started = Instant::now();

        let project = match self.detector.detect_type(root).await {
            Ok(project) => project,
            Err(e) => {
                warn!("Project detection failed, continuing as unknown: {}", e);
                ProjectInfo::unknown()
            }
        };
        let loaded = self.cache.load_cache().await;
        info!(
            "Analysing {} project at {:?} ({} cached files)",
            project.project_type, root, loaded
        );
        let deadline = Instant::now() + options.overall_timeout;

        let mut run = RunState::default();
        let phase = self.process(root, options, deadline, &mut run).await?;
        let elapsed = started.elapsed();

        let status = match phase {
            Phase::Finished => RunStatus::Complete,
            Phase::Expired => {
                warn!(
                    "Overall timeout of {}ms reached, returning partial results for {} files",
                    options.overall_timeout.as_millis(),
                    run.builder.file_count()
                );
                RunStatus::TimedOut {
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            }
        };

        if let Err(e) = self.cache.persist_cache().await {
            warn!("Failed to persist cache: {}", e);
        }

        let performance = options
            .enable_instrumentation
            .then(|| run.performance(elapsed, &self.selector));
        info!(
            "Analysis finished in {}ms: {} parsed, {} reused, {} failed, {} batches",
            elapsed.as_millis(),
            run.parsed,
            run.reused,
            run.failed,
            run.batches
        );

        let metadata = SnapshotMetadata {
            root: root.display().to_string(),
            project,
            analyzed_at: Utc::now(),
        };
        let snapshot: AnalysisSnapshot = run.builder.build(metadata, performance);
        Ok(AnalysisOutcome { snapshot, status })
    }

    async fn process(
        &self,
        root: &Path,
        options: &RunOptions,
        deadline: Instant,
        run: &mut RunState,
    ) -> Result<Phase> {
        let discovery = options.discovery();
        let scan_root = root.to_path_buf();
        let walk = tokio::task::spawn_blocking(move || discover_files(&scan_root, &discovery));
        let Ok(walked) = timeout_at(deadline, walk).await else {
            return Ok(Phase::Expired);
        };
        let candidates = walked
            .map_err(|e| CodeAtlasError::InvalidOperation(format!("Discovery task failed: {}", e)))??;
        run.discovered = candidates.len();

        let io = self.selector.select(&StrategyContext::Io);
        let mut records = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let load = io.execute(operation(move || load_record(candidate)));
            match timeout_at(deadline, load).await {
                Err(_) => return Ok(Phase::Expired),
                Ok(Ok(record)) => records.push(record),
                Ok(Err(e)) => {
                    self.invalidate(&candidate.relative_path, "unreadable");
                    run.fail(FileFailure {
                        path: candidate.relative_path.clone(),
                        reason: failure_reason(&e),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.detect_changes(&candidates, &records);

        let batch_size = options.batch_size();
        let batches = records.len().div_ceil(batch_size);
        let mut reporter = ProgressReporter::new(
            options.enable_progress,
            options.progress_interval,
            self.observer.clone(),
        );

        for (index, batch) in records.chunks(batch_size).enumerate() {
            if index > 0 {
                self.relieve_memory(run);
                if !options.batch_delay.is_zero()
                    && timeout_at(deadline, tokio::time::sleep(options.batch_delay))
                        .await
                        .is_err()
                {
                    return Ok(Phase::Expired);
                }
            }

            run.batches += 1;
            let expired = self.run_batch(batch, options, deadline, run).await;
            reporter.report(
                ProgressUpdate {
                    processed: run.processed,
                    total: records.len(),
                    cache_hits: run.reused,
                    failures: run.failed,
                    batch: index + 1,
                    batches,
                },
                expired || index + 1 == batches,
            );
            if expired {
                return Ok(Phase::Expired);
            }
        }
        Ok(Phase::Finished)
    }

    fn invalidate(&self, path: &str, why: &str) {
        let removed = self.cache.invalidate_cache(path);
        let dependents = self.cache.invalidate_dependents(path);
        if removed || !dependents.is_empty() {
            debug!(
                "Invalidated {} ({}) and {} dependents",
                path,
                why,
                dependents.len()
            );
        }
    }

    /// Invalidate changed and deleted files before any batch runs, so a
    /// dependent never reuses facts computed against an old dependency.
    ///
    /// A file without a valid entry counts as changed even when nothing is
    /// cached for it: its entry may have been evicted while its dependents
    /// stayed cached, and the dependency index still links them.
    fn detect_changes(&self, candidates: &[Candidate], records: &[FileRecord]) {
        for record in records {
            let path = record.relative_path.as_str();
            if !self.cache.validate_file_hash(path, &record.content_hash) {
                self.invalidate(path, "changed");
            }
        }

        let present: HashSet<&str> = candidates
            .iter()
            .map(|c| c.relative_path.as_str())
            .collect();
        for path in self.cache.paths() {
            if !present.contains(path.as_str()) {
                self.invalidate(&path, "deleted");
            }
        }
    }

    fn relieve_memory(&self, run: &mut RunState) {
        let sample = self.governor.check_memory_pressure();
        if sample.level == MemoryPressure::High {
            warn!(
                "High memory pressure ({:.1}% of budget), reclaiming before next batch",
                sample.usage_ratio * 100.0
            );
            let targets: [&dyn Reclaimable; 2] = [self.cache.as_ref(), self.selector.as_ref()];
            let report = self
                .governor
                .optimize_memory(&sample.recommendations, &targets);
            run.reclaimed += report.entries_released;
        }
        run.last_sample = Some(sample);
    }

    /// Process one batch concurrently. Returns true when the deadline expired
    /// first; files that completed before that are kept.
    async fn run_batch(
        &self,
        batch: &[FileRecord],
        options: &RunOptions,
        deadline: Instant,
        run: &mut RunState,
    ) -> bool {
        let parser_strategy = self.selector.select(&StrategyContext::Parser);
        let mut tasks = JoinSet::new();
        let mut paths = HashMap::new();
        for record in batch {
            let path = record.relative_path.clone();
            let handle = tasks.spawn(process_file(
                record.clone(),
                self.cache.clone(),
                self.parser.clone(),
                parser_strategy.clone(),
                options.timeout_per_file,
            ));
            paths.insert(handle.id(), path);
        }

        loop {
            match timeout_at(deadline, tasks.join_next_with_id()).await {
                Err(_) => {
                    warn!("Deadline reached with {} files in flight", tasks.len());
                    tasks.abort_all();
                    return true;
                }
                Ok(None) => return false,
                Ok(Some(Ok((_, outcome)))) => run.absorb(outcome),
                Ok(Some(Err(e))) => {
                    let path = paths.get(&e.id()).cloned().unwrap_or_default();
                    run.absorb(FileOutcome::Failed(FileFailure {
                        path,
                        reason: FailureReason::Parse,
                        message: format!("analysis task failed: {}", e),
                    }));
                }
            }
        }
    }
}
