//! CLI command implementations.
//!
//! Each `run_*` function builds what it needs from a [`Config`], runs one
//! operation and prints the result as text or JSON on stdout.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use snap_sweep_core::embedding::Embedder;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::pipeline::{IndexReport, Outcome, PairsReport, SweepOptions, SweepReport, Sweeper};
use crate::progress::{format_number, ProgressReporter};
use crate::quality::create_scorer;
use crate::relocate::RelocateOutcome;
use crate::sqlite_store::SqliteVectorStore;
use crate::{db, migrate, stats};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Wire the SQLite index, embedder and scorer named in `config` into a [`Sweeper`].
pub async fn build_sweeper(config: &Config, progress: Box<dyn ProgressReporter>) -> Result<Sweeper> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let store = Arc::new(SqliteVectorStore::new(pool));
    let scorer = create_scorer(&config.quality.scorer)?;

    Sweeper::new(config, store, embedder, scorer, progress)
}

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Index initialized at {}.", config.index.path.display());
    Ok(())
}

pub async fn run_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let collected = stats::collect(&pool, &config.index.path).await?;
    pool.close().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&collected)?),
        OutputFormat::Text => stats::print(&collected),
    }
    Ok(())
}

pub async fn run_index(
    config: &Config,
    dir: &Path,
    format: OutputFormat,
    progress: Box<dyn ProgressReporter>,
    started: Instant,
) -> Result<()> {
    let sweeper = build_sweeper(config, progress).await?;
    let outcome = sweeper.run_index(dir).await?;
    emit(outcome, format, started, |report: &IndexReport| {
        println!("index {}", dir.display());
        print_index_lines(report.images, report.hash_failures, &report.index);
    })
}

pub async fn run_pairs(
    config: &Config,
    dir: &Path,
    limit: Option<usize>,
    format: OutputFormat,
    progress: Box<dyn ProgressReporter>,
    started: Instant,
) -> Result<()> {
    let sweeper = build_sweeper(config, progress).await?;
    let outcome = sweeper.run_pairs(dir, limit).await?;
    emit(outcome, format, started, |report: &PairsReport| {
        println!("pairs {}", dir.display());
        print_index_lines(report.images, report.hash_failures, &report.index);
        println!(
            "  pairs:       {} found, {} valid",
            format_number(report.mined as u64),
            format_number(report.pairs.len() as u64)
        );
        println!();
        for pair in &report.pairs {
            println!("  {:.4}  {}  {}", pair.score, pair.path_a, pair.path_b);
        }
    })
}

pub async fn run_sweep(
    config: &Config,
    options: &SweepOptions,
    format: OutputFormat,
    progress: Box<dyn ProgressReporter>,
    started: Instant,
) -> Result<()> {
    let sweeper = build_sweeper(config, progress).await?;
    let outcome = sweeper.run(options).await?;
    emit(outcome, format, started, |report: &SweepReport| {
        print_sweep(options, report, &config.relocate.subfolder)
    })
}

/// Print an outcome, then the elapsed time (text) or an `elapsed_secs` field (JSON).
fn emit<T: Serialize>(
    outcome: Outcome<T>,
    format: OutputFormat,
    started: Instant,
    print_text: impl FnOnce(&T),
) -> Result<()> {
    let elapsed = started.elapsed().as_secs_f64();
    match format {
        OutputFormat::Json => {
            let value = match &outcome {
                Outcome::Completed(report) => serde_json::json!({
                    "status": "completed",
                    "report": report,
                    "elapsed_secs": elapsed,
                }),
                Outcome::Aborted { reason, at, states } => serde_json::json!({
                    "status": "aborted",
                    "reason": reason,
                    "message": reason.to_string(),
                    "state": at,
                    "states": states,
                    "elapsed_secs": elapsed,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            match &outcome {
                Outcome::Completed(report) => print_text(report),
                Outcome::Aborted { reason, .. } => println!("{}", reason),
            }
            println!("Total time: {:.2} seconds", elapsed);
        }
    }
    Ok(())
}

fn print_index_lines(images: usize, hash_failures: usize, index: &crate::index::SyncReport) {
    println!(
        "  images:      {} ({} unreadable)",
        format_number(images as u64),
        format_number(hash_failures as u64)
    );
    println!(
        "  index:       {} embedded, {} renamed, {} already indexed, {} failed",
        format_number(index.embedded as u64),
        format_number(index.renamed as u64),
        format_number(index.unchanged as u64),
        format_number(index.failed as u64)
    );
    if index.stale > 0 {
        println!(
            "  re-indexed:  {} entries from another embedding model",
            format_number(index.stale as u64)
        );
    }
}

fn print_sweep(options: &SweepOptions, report: &SweepReport, subfolder: &str) {
    println!(
        "sweep {}{}",
        options.dir.display(),
        if report.dry_run { " (dry run)" } else { "" }
    );
    print_index_lines(report.images, report.hash_failures, &report.index);
    println!(
        "  pairs:       {} found, {} valid",
        format_number(report.mined as u64),
        format_number(report.valid_pairs as u64)
    );
    println!(
        "  ranked:      {} ({} failed)",
        format_number(report.results.len() as u64),
        format_number(report.scoring_failures as u64)
    );
    println!();

    for r in &report.results {
        println!(
            "  {:.4}  keep {} ({:.2})  discard {} ({:.2})",
            r.similarity, r.best_path, r.best_score, r.worst_path, r.worst_score
        );
    }
    if !report.results.is_empty() {
        println!();
    }

    if report.dry_run {
        println!(
            "Would set aside {} file(s) into {}/:",
            report.discarded.len(),
            subfolder
        );
        for path in &report.discarded {
            println!("  {}", path);
        }
        return;
    }

    for (source, outcome) in &report.relocations {
        match outcome {
            RelocateOutcome::Moved(dest) => println!("  moved   {} → {}", source, dest.display()),
            RelocateOutcome::Copied(dest) => println!("  copied  {} → {}", source, dest.display()),
            RelocateOutcome::Skipped(dest) => {
                println!("  skipped {} ({} exists)", source, dest.display())
            }
        }
    }
    println!(
        "Set aside {} file(s), skipped {}, failed {}.",
        report.relocated(),
        report.skipped(),
        report.relocation_failures
    );
}
