//! Pairwise quality comparison.
//!
//! [`QualityComparator::rank`] submits pairs in chunks. Each pair becomes a
//! task that takes a semaphore permit and then scores both images at once on
//! the blocking pool. Decoding runs in parallel. The scorer itself sits
//! behind a mutex, so only one `score` call runs at a time. Results are
//! collected in completion order, and a pair whose image cannot be scored is
//! logged and left out. The progress counter moves once per finished pair,
//! failed or not.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use snap_sweep_core::models::{ComparisonResult, SimilarityPair};

use crate::error::ItemError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::quality::{ImageLoader, QualityScorer};

type SharedScorer = Arc<Mutex<Box<dyn QualityScorer>>>;

#[derive(Debug, Default)]
pub struct RankReport {
    /// In completion order.
    pub results: Vec<ComparisonResult>,
    pub failures: Vec<ItemError>,
    /// Most comparisons that held a permit at the same time.
    pub peak_in_flight: usize,
}

/// Counts comparisons currently holding a permit, and the high-water mark.
#[derive(Default)]
struct InFlight {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct QualityComparator {
    scorer: SharedScorer,
    loader: Arc<ImageLoader>,
    semaphore: Arc<Semaphore>,
    chunk_size: usize,
}

impl QualityComparator {
    pub fn new(
        scorer: Box<dyn QualityScorer>,
        loader: ImageLoader,
        max_concurrency: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            scorer: Arc::new(Mutex::new(scorer)),
            loader: Arc::new(loader),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn rank(&self, pairs: &[SimilarityPair], progress: &dyn ProgressReporter) -> RankReport {
        let total = pairs.len() as u64;
        let mut done = 0u64;
        let mut report = RankReport::default();
        let in_flight = Arc::new(InFlight::default());

        for chunk in pairs.chunks(self.chunk_size) {
            let mut tasks = JoinSet::new();
            for pair in chunk {
                tasks.spawn(compare_pair(
                    pair.clone(),
                    Arc::clone(&self.scorer),
                    Arc::clone(&self.loader),
                    Arc::clone(&self.semaphore),
                    Arc::clone(&in_flight),
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                done += 1;
                match joined.map_err(ItemError::from).and_then(|r| r) {
                    Ok(result) => report.results.push(result),
                    Err(e) => {
                        warn!(error = %e, "pair comparison failed, skipped");
                        report.failures.push(e);
                    }
                }
                progress.report(ProgressEvent::Scoring { n: done, total });
            }
        }

        report.peak_in_flight = in_flight.peak.load(Ordering::SeqCst);
        debug!(
            ranked = report.results.len(),
            failed = report.failures.len(),
            peak_in_flight = report.peak_in_flight,
            "pairs ranked"
        );
        report
    }
}

async fn compare_pair(
    pair: SimilarityPair,
    scorer: SharedScorer,
    loader: Arc<ImageLoader>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
) -> Result<ComparisonResult, ItemError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| ItemError::Worker(e.to_string()))?;
    let _active = in_flight.enter();

    let (score_a, score_b) = tokio::join!(
        score_image(PathBuf::from(&pair.path_a), Arc::clone(&scorer), Arc::clone(&loader)),
        score_image(PathBuf::from(&pair.path_b), scorer, loader),
    );

    Ok(ComparisonResult::rank(
        (pair.path_a, score_a?),
        (pair.path_b, score_b?),
        pair.score,
    ))
}

async fn score_image(
    path: PathBuf,
    scorer: SharedScorer,
    loader: Arc<ImageLoader>,
) -> Result<f64, ItemError> {
    tokio::task::spawn_blocking(move || {
        let image = loader.load(&path)?;
        let mut scorer = scorer
            .lock()
            .map_err(|_| ItemError::Worker("scorer lock poisoned".into()))?;
        match scorer.score(&image) {
            Ok(score) if score.is_finite() => Ok(score),
            Ok(score) => Err(ItemError::Scoring {
                path,
                message: format!("non-finite score {}", score),
            }),
            Err(e) => Err(ItemError::Scoring {
                path,
                message: e.to_string(),
            }),
        }
    })
    .await?
}
