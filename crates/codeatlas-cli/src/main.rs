use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codeatlas_cache::IncrementalCache;
use codeatlas_core::{init_tracing, AtlasConfig, ConfigManager};
use codeatlas_resilience::{MetricsRegistry, StrategyContext, StrategySelector};
use codeatlas_scheduler::{AnalysisOutcome, AnalysisScheduler, ProgressUpdate, RunOptions, RunStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "codeatlas")]
#[command(about = "CodeAtlas - incremental structural analysis of source trees", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file (defaults to ./.codeatlas.toml, then ~/.codeatlas/config.toml)
    #[arg(short, long, global = true, env = "CODEATLAS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a source tree
    Analyze {
        /// Project root
        root: PathBuf,

        /// Files processed concurrently per batch
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Per-file parse timeout in milliseconds
        #[arg(long)]
        timeout_per_file_ms: Option<u64>,

        /// Deadline for the whole run in milliseconds
        #[arg(long)]
        overall_timeout_ms: Option<u64>,

        /// Neither load nor persist the on-disk cache
        #[arg(long)]
        no_cache: bool,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show statistics of the persisted cache
    Stats {
        /// Project root
        root: PathBuf,
    },

    /// Remove every cached entry
    Clear {
        /// Project root
        root: PathBuf,
    },
}

#[derive(Serialize)]
struct CacheStatsResult {
    root: String,
    cache_dir: String,
    entries: usize,
    languages: std::collections::BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct CacheClearResult {
    root: String,
    removed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::from_path(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;
    let mut config = manager.into_config();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging);

    if let Err(e) = execute_command(&cli, config).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn execute_command(cli: &Cli, config: AtlasConfig) -> Result<()> {
    match &cli.command {
        Commands::Analyze {
            root,
            max_concurrent,
            timeout_per_file_ms,
            overall_timeout_ms,
            no_cache,
            progress,
        } => {
            let mut config = config;
            if let Some(n) = max_concurrent {
                config.scheduler.max_concurrent_files = *n;
            }
            if let Some(ms) = timeout_per_file_ms {
                config.scheduler.timeout_per_file_ms = *ms;
            }
            if let Some(ms) = overall_timeout_ms {
                config.scheduler.overall_timeout_ms = *ms;
            }
            if *no_cache {
                config.cache.enable_persistence = false;
            }
            let outcome = analyze(root, &config, *progress).await?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                OutputFormat::Pretty => print_summary(&outcome),
            }
            Ok(())
        }
        Commands::Cache(CacheCommands::Stats { root }) => {
            let cache = open_cache(root, &config)?;
            let entries = cache.load_cache().await;
            let mut languages = std::collections::BTreeMap::new();
            for path in cache.paths() {
                if let Some(entry) = cache.get_cache(&path) {
                    *languages.entry(entry.language.to_string()).or_insert(0) += 1;
                }
            }
            let result = CacheStatsResult {
                root: root.display().to_string(),
                cache_dir: root.join(&config.cache.cache_dir).display().to_string(),
                entries,
                languages,
            };
            print_output(&cli.output, &result)
        }
        Commands::Cache(CacheCommands::Clear { root }) => {
            let cache = open_cache(root, &config)?;
            cache.load_cache().await;
            let removed = cache.clear_cache();
            cache
                .persist_cache()
                .await
                .context("Failed to write cleared cache")?;
            let result = CacheClearResult {
                root: root.display().to_string(),
                removed,
            };
            print_output(&cli.output, &result)
        }
    }
}

fn open_cache(root: &Path, config: &AtlasConfig) -> Result<IncrementalCache> {
    if !root.is_dir() {
        bail!("Invalid root path: {}", root.display());
    }
    let selector = StrategySelector::new(&config.strategies, Arc::new(MetricsRegistry::new()));
    Ok(IncrementalCache::for_root(
        root,
        &config.cache,
        selector.select(&StrategyContext::Io),
    ))
}

async fn analyze(root: &Path, config: &AtlasConfig, progress: bool) -> Result<AnalysisOutcome> {
    let mut options = RunOptions::from(&config.scheduler);
    let mut scheduler = AnalysisScheduler::for_root(root, config);

    let bar = if progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .context("Invalid progress template")?
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        let observer_bar = bar.clone();
        scheduler = scheduler.with_observer(Arc::new(move |update: ProgressUpdate| {
            observer_bar.set_length(update.total as u64);
            observer_bar.set_position(update.processed as u64);
            observer_bar.set_message(format!(
                "batch {}/{} | {} cached | {} failed",
                update.batch, update.batches, update.cache_hits, update.failures
            ));
        }));
        // the bar replaces the periodic log line
        options.enable_progress = false;
        Some(bar)
    } else {
        None
    };

    debug!("Run options: {:?}", options);
    let outcome = scheduler
        .run(root, &options)
        .await
        .with_context(|| format!("Analysis of {} failed", root.display()))?;

    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }
    Ok(outcome)
}

fn print_output<T: Serialize>(format: &OutputFormat, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json)?),
        OutputFormat::Pretty => {
            if let Some(map) = json.as_object() {
                for (key, value) in map {
                    println!("{}: {}", key.cyan(), value);
                }
            }
        }
    }
    Ok(())
}

fn print_summary(outcome: &AnalysisOutcome) {
    let snapshot = &outcome.snapshot;
    if let RunStatus::TimedOut { elapsed_ms } = outcome.status {
        println!(
            "{} run stopped after {}ms, results are partial",
            "Warning:".yellow().bold(),
            elapsed_ms
        );
    }

    println!(
        "{} {} ({} project)",
        "Analysed".green().bold(),
        snapshot.metadata.root,
        snapshot.metadata.project.project_type
    );
    println!(
        "  {} files, {} lines, {} bytes",
        snapshot.structure.total_files, snapshot.structure.total_lines, snapshot.structure.total_size
    );
    for (language, count) in &snapshot.structure.languages {
        println!("    {:<12} {}", language, count);
    }
    println!(
        "  {} functions, {} classes, {} interfaces (avg cyclomatic {:.2})",
        snapshot.complexity.functions,
        snapshot.complexity.classes,
        snapshot.complexity.interfaces,
        snapshot.complexity.average_cyclomatic
    );
    println!(
        "  {} {:.2} ({:.0}% documented)",
        "Quality score:".bold(),
        snapshot.quality.score,
        snapshot.quality.documentation_ratio * 100.0
    );

    if let Some(perf) = &snapshot.performance {
        println!(
            "  {} parsed, {} reused ({:.0}% hit rate), {} batches in {}ms",
            perf.files_parsed,
            perf.files_reused,
            perf.cache_hit_rate * 100.0,
            perf.batches,
            perf.elapsed_ms
        );
    }

    if !snapshot.failures.is_empty() {
        println!("  {} {} files", "Failed:".red().bold(), snapshot.failures.len());
        for failure in &snapshot.failures {
            println!("    {} [{}] {}", failure.path, failure.reason, failure.message);
        }
    }
}
