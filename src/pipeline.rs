//! Sweep orchestration.
//!
//! A run walks these states strictly in order:
//!
//! ```text
//! Scanning → Hashing → Indexing → Mining → Validating → Scoring → Deciding
//!          → DryRunReporting | Relocating → Done
//! ```
//!
//! Every stage finishes before the next one starts. A run can stop early
//! with [`Outcome::Aborted`] when there is nothing left to do (no images,
//! no near duplicates, no valid pairs). That is an ordinary result, not an
//! error. `Err` is reserved for failures of the run itself (unreadable root
//! directory, index storage errors).

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use snap_sweep_core::embedding::Embedder;
use snap_sweep_core::mining::{sort_pairs, MiningParams};
use snap_sweep_core::models::{discard_set, ComparisonResult, ImageRef, SimilarityPair};
use snap_sweep_core::store::VectorStore;

use crate::comparator::QualityComparator;
use crate::config::{self, Config, ScanConfig};
use crate::hasher;
use crate::index::{SyncReport, VectorIndex};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::quality::{ImageLoader, QualityScorer};
use crate::relocate::{relocate_all, RelocateMode, RelocateOutcome};
use crate::scanner;
use crate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Scanning,
    Hashing,
    Indexing,
    Mining,
    Validating,
    Scoring,
    Deciding,
    DryRunReporting,
    Relocating,
    Done,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            PipelineState::Scanning => "scanning",
            PipelineState::Hashing => "hashing",
            PipelineState::Indexing => "indexing",
            PipelineState::Mining => "mining",
            PipelineState::Validating => "validating",
            PipelineState::Scoring => "scoring",
            PipelineState::Deciding => "deciding",
            PipelineState::DryRunReporting => "dry run",
            PipelineState::Relocating => "relocating",
            PipelineState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum AbortReason {
    #[error("No image files found.")]
    NoImages,
    #[error("No near duplicates found.")]
    NoDuplicates,
    #[error("No valid near duplicates pairs found.")]
    NoValidPairs,
}

#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Aborted {
        reason: AbortReason,
        at: PipelineState,
        states: Vec<PipelineState>,
    },
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(report) => Some(report),
            Outcome::Aborted { .. } => None,
        }
    }
}

pub type SweepOutcome = Outcome<SweepReport>;

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub dir: PathBuf,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub images: usize,
    pub hash_failures: usize,
    pub index: SyncReport,
    pub states: Vec<PipelineState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairsReport {
    pub images: usize,
    pub hash_failures: usize,
    pub index: SyncReport,
    /// Pairs found before the existence check.
    pub mined: usize,
    /// Sorted by score descending.
    pub pairs: Vec<SimilarityPair>,
    pub states: Vec<PipelineState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub images: usize,
    pub hash_failures: usize,
    pub index: SyncReport,
    pub mined: usize,
    pub valid_pairs: usize,
    pub scoring_failures: usize,
    /// Sorted by similarity descending, then by paths.
    pub results: Vec<ComparisonResult>,
    pub discarded: Vec<String>,
    pub relocations: Vec<(String, RelocateOutcome)>,
    pub relocation_failures: usize,
    pub dry_run: bool,
    pub states: Vec<PipelineState>,
}

impl SweepReport {
    pub fn relocated(&self) -> usize {
        self.relocations
            .iter()
            .filter(|(_, o)| !matches!(o, RelocateOutcome::Skipped(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.relocations.len() - self.relocated()
    }
}

/// Why a stage stopped the run.
enum Halt {
    Abort(AbortReason),
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for Halt {
    fn from(err: anyhow::Error) -> Self {
        Halt::Fatal(err)
    }
}

/// Visited states, with a log line and a progress event per transition.
struct Trail<'a> {
    states: Vec<PipelineState>,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Trail<'a> {
    fn new(progress: &'a dyn ProgressReporter) -> Self {
        Self {
            states: Vec::new(),
            progress,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        info!(state = state.label(), "entering state");
        self.progress.report(ProgressEvent::Stage {
            name: state.label().to_string(),
        });
        self.states.push(state);
    }

    fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Scanning)
    }

    fn finish<T>(self, result: std::result::Result<T, Halt>) -> Result<Outcome<T>> {
        match result {
            Ok(report) => Ok(Outcome::Completed(report)),
            Err(Halt::Abort(reason)) => {
                let at = self.current();
                info!(state = at.label(), reason = %reason, "run aborted");
                Ok(Outcome::Aborted {
                    reason,
                    at,
                    states: self.states,
                })
            }
            Err(Halt::Fatal(err)) => Err(err),
        }
    }
}

/// Scanned, hashed and indexed images.
struct Indexed {
    images: usize,
    hash_failures: usize,
    hashed: Vec<ImageRef>,
    index: SyncReport,
}

/// Validated pairs ready for scoring.
struct Prepared {
    indexed: Indexed,
    mined: usize,
    pairs: Vec<SimilarityPair>,
}

/// Owns every collaborator of a run. Construct once, run many times.
pub struct Sweeper {
    index: VectorIndex,
    comparator: QualityComparator,
    scan: ScanConfig,
    params: MiningParams,
    threshold: f64,
    include_exact_copies: bool,
    subfolder: String,
    mode: RelocateMode,
    relocate_workers: usize,
    hash_workers: usize,
    progress: Box<dyn ProgressReporter>,
}

impl Sweeper {
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        scorer: Box<dyn QualityScorer>,
        progress: Box<dyn ProgressReporter>,
    ) -> Result<Self> {
        config::validate(config)?;
        let quality = &config.quality;
        Ok(Self {
            index: VectorIndex::new(store, embedder, config.embedding.chunks),
            comparator: QualityComparator::new(
                scorer,
                ImageLoader::new(quality.resize, quality.cache_entries),
                quality.effective_concurrency(),
                quality.chunk_size,
            ),
            scan: config.scan.clone(),
            params: config.mining.params(),
            threshold: config.mining.threshold,
            include_exact_copies: config.mining.include_exact_copies,
            subfolder: config.relocate.subfolder.clone(),
            mode: config.relocate.mode.parse()?,
            relocate_workers: config.relocate.effective_workers(),
            hash_workers: config::default_workers(),
            progress,
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Scanning, Hashing and Indexing only.
    pub async fn run_index(&self, dir: &std::path::Path) -> Result<Outcome<IndexReport>> {
        let mut trail = Trail::new(self.progress.as_ref());
        let result = self.scan_and_index(dir, &mut trail).await;
        let result = result.map(|indexed| {
            trail.enter(PipelineState::Done);
            IndexReport {
                images: indexed.images,
                hash_failures: indexed.hash_failures,
                index: indexed.index,
                states: trail.states.clone(),
            }
        });
        trail.finish(result)
    }

    /// Everything up to and including Validating; nothing is scored or moved.
    pub async fn run_pairs(&self, dir: &std::path::Path, limit: Option<usize>) -> Result<Outcome<PairsReport>> {
        let mut trail = Trail::new(self.progress.as_ref());
        let result = self.prepare(dir, limit, &mut trail).await;
        let result = result.map(|prepared| {
            trail.enter(PipelineState::Done);
            PairsReport {
                images: prepared.indexed.images,
                hash_failures: prepared.indexed.hash_failures,
                index: prepared.indexed.index,
                mined: prepared.mined,
                pairs: prepared.pairs,
                states: trail.states.clone(),
            }
        });
        trail.finish(result)
    }

    /// The full sweep.
    pub async fn run(&self, options: &SweepOptions) -> Result<SweepOutcome> {
        let mut trail = Trail::new(self.progress.as_ref());
        let result = self.sweep(options, &mut trail).await;
        trail.finish(result)
    }

    async fn sweep(
        &self,
        options: &SweepOptions,
        trail: &mut Trail<'_>,
    ) -> std::result::Result<SweepReport, Halt> {
        let prepared = self.prepare(&options.dir, options.limit, trail).await?;

        trail.enter(PipelineState::Scoring);
        let ranked = self
            .comparator
            .rank(&prepared.pairs, self.progress.as_ref())
            .await;
        let mut results = ranked.results;
        sort_results(&mut results);

        trail.enter(PipelineState::Deciding);
        let discarded: Vec<String> = discard_set(&results).into_iter().collect();
        info!(
            ranked = results.len(),
            discarded = discarded.len(),
            "discard set computed"
        );

        let mut relocations = Vec::new();
        let mut relocation_failures = 0;
        if options.dry_run {
            trail.enter(PipelineState::DryRunReporting);
        } else {
            trail.enter(PipelineState::Relocating);
            let report = relocate_all(
                &discarded,
                &self.subfolder,
                self.mode,
                self.relocate_workers,
                self.progress.as_ref(),
            )
            .await;
            relocation_failures = report.failures.len();
            relocations = report.outcomes;
            relocations.sort_by(|a, b| a.0.cmp(&b.0));
        }

        trail.enter(PipelineState::Done);
        Ok(SweepReport {
            images: prepared.indexed.images,
            hash_failures: prepared.indexed.hash_failures,
            index: prepared.indexed.index,
            mined: prepared.mined,
            valid_pairs: prepared.pairs.len(),
            scoring_failures: ranked.failures.len(),
            results,
            discarded,
            relocations,
            relocation_failures,
            dry_run: options.dry_run,
            states: trail.states.clone(),
        })
    }

    async fn scan_and_index(
        &self,
        dir: &std::path::Path,
        trail: &mut Trail<'_>,
    ) -> std::result::Result<Indexed, Halt> {
        trail.enter(PipelineState::Scanning);
        let (root, scan, subfolder) = (dir.to_path_buf(), self.scan.clone(), self.subfolder.clone());
        let paths = tokio::task::spawn_blocking(move || scanner::scan_images(&root, &scan, &subfolder))
            .await
            .map_err(anyhow::Error::from)??;
        info!(images = paths.len(), dir = %dir.display(), "scan finished");
        if paths.is_empty() {
            return Err(Halt::Abort(AbortReason::NoImages));
        }

        trail.enter(PipelineState::Hashing);
        let hashed = hasher::hash_files(&paths, self.hash_workers, self.progress.as_ref()).await;
        if hashed.images.is_empty() {
            return Err(Halt::Abort(AbortReason::NoImages));
        }

        trail.enter(PipelineState::Indexing);
        let index = self
            .index
            .sync(&hashed.images, self.progress.as_ref())
            .await?;
        info!(
            embedded = index.embedded,
            renamed = index.renamed,
            unchanged = index.unchanged,
            stale = index.stale,
            failed = index.failed,
            "index synced"
        );

        Ok(Indexed {
            images: paths.len(),
            hash_failures: hashed.failures.len(),
            hashed: hashed.images,
            index,
        })
    }

    async fn prepare(
        &self,
        dir: &std::path::Path,
        limit: Option<usize>,
        trail: &mut Trail<'_>,
    ) -> std::result::Result<Prepared, Halt> {
        let indexed = self.scan_and_index(dir, trail).await?;

        trail.enter(PipelineState::Mining);
        let unique: BTreeSet<&String> = indexed.hashed.iter().map(|i| &i.content_hash).collect();
        let ids: Vec<String> = unique.into_iter().cloned().collect();
        let mined = self
            .index
            .search(&ids, &self.params, self.threshold, None)
            .await?;
        let exact = if self.include_exact_copies {
            exact_copy_pairs(&indexed.hashed)
        } else {
            Vec::new()
        };
        let pairs = merge_pairs(exact, mined, limit);
        info!(pairs = pairs.len(), threshold = self.threshold, "mining finished");
        if pairs.is_empty() {
            return Err(Halt::Abort(AbortReason::NoDuplicates));
        }

        trail.enter(PipelineState::Validating);
        let mined = pairs.len();
        let pairs = tokio::task::spawn_blocking(move || validate::filter_existing(pairs))
            .await
            .map_err(anyhow::Error::from)?;
        if pairs.is_empty() {
            return Err(Halt::Abort(AbortReason::NoValidPairs));
        }

        Ok(Prepared {
            indexed,
            mined,
            pairs,
        })
    }
}

/// Score-1.0 pairs for every two paths with the same content hash.
pub fn exact_copy_pairs(images: &[ImageRef]) -> Vec<SimilarityPair> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for image in images {
        groups
            .entry(image.content_hash.as_str())
            .or_default()
            .push(image.path.as_str());
    }
    for paths in groups.values_mut() {
        paths.sort_unstable();
    }

    let mut pairs = Vec::new();
    for paths in groups.values().filter(|p| p.len() > 1) {
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                pairs.extend(SimilarityPair::new(1.0, *a, *b));
            }
        }
    }
    sort_pairs(&mut pairs);
    pairs
}

/// Exact copies first, then mined pairs not already listed, capped at `limit`.
pub fn merge_pairs(
    exact: Vec<SimilarityPair>,
    mined: Vec<SimilarityPair>,
    limit: Option<usize>,
) -> Vec<SimilarityPair> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut merged = Vec::with_capacity(exact.len() + mined.len());
    for pair in exact.into_iter().chain(mined) {
        let (a, b) = pair.key();
        if seen.insert((a.to_string(), b.to_string())) {
            merged.push(pair);
        }
    }
    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

fn sort_results(results: &mut [ComparisonResult]) {
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.best_path.cmp(&b.best_path))
            .then_with(|| a.worst_path.cmp(&b.worst_path))
    });
}
