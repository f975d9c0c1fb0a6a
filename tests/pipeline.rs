//! End-to-end sweep runs against an in-memory index with deterministic
//! test collaborators.

use anyhow::Result;
use async_trait::async_trait;
use image::{GrayImage, Luma};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use snap_sweep::config::Config;
use snap_sweep::pipeline::{AbortReason, Outcome, PipelineState, SweepOptions, Sweeper};
use snap_sweep::progress::NoProgress;
use snap_sweep::quality::QualityScorer;
use snap_sweep::relocate::RelocateOutcome;
use snap_sweep_core::embedding::Embedder;
use snap_sweep_core::store::memory::InMemoryVectorStore;

/// Looks vectors up by file name. Files listed in `vanish` are deleted
/// right after being embedded.
#[derive(Default)]
struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    vanish: Vec<String>,
    images: AtomicUsize,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        self.images.fetch_add(paths.len(), Ordering::SeqCst);
        let mut out = Vec::new();
        for path in paths {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let vector = self
                .vectors
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("no vector for {}", name))?;
            out.push(vector.clone());
            if self.vanish.contains(&name) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(out)
    }
}

/// Quality = image width.
struct WidthScorer;

impl QualityScorer for WidthScorer {
    fn name(&self) -> &str {
        "width"
    }
    fn score(&mut self, image: &GrayImage) -> Result<f64> {
        Ok(image.width() as f64)
    }
}

fn png(dir: &Path, name: &str, width: u32, shade: u8) -> String {
    let path = dir.join(name);
    GrayImage::from_pixel(width, 8, Luma([shade])).save(&path).unwrap();
    std::fs::canonicalize(&path)
        .unwrap()
        .to_string_lossy()
        .to_string()
}

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.quality.resize = 0;
    cfg.mining.threshold = 0.9;
    cfg.mining.top_k = 2;
    cfg
}

fn sweeper(cfg: &Config, embedder: Arc<TableEmbedder>) -> Sweeper {
    Sweeper::new(
        cfg,
        Arc::new(InMemoryVectorStore::new()),
        embedder,
        Box::new(WidthScorer),
        Box::new(NoProgress),
    )
    .unwrap()
}

/// x (width 30) and y (width 45) are near duplicates (cos 0.95); z is unrelated.
fn near_duplicate_set(dir: &Path) -> (String, String, String, Arc<TableEmbedder>) {
    let x = png(dir, "x.png", 30, 100);
    let y = png(dir, "y.png", 45, 100);
    let z = png(dir, "z.png", 20, 200);
    let embedder = Arc::new(TableEmbedder::new(&[
        ("x.png", vec![1.0, 0.0, 0.0]),
        ("y.png", vec![0.95, 0.31225, 0.0]),
        ("z.png", vec![0.0, 0.0, 1.0]),
    ]));
    (x, y, z, embedder)
}

fn dir_listing(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap().path().to_path_buf())
        .collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn sweep_moves_the_lower_quality_copy() {
    let tmp = TempDir::new().unwrap();
    let (x, y, z, embedder) = near_duplicate_set(tmp.path());
    let sweeper = sweeper(&config(), embedder);

    let outcome = sweeper
        .run(&SweepOptions {
            dir: tmp.path().to_path_buf(),
            limit: None,
            dry_run: false,
        })
        .await
        .unwrap();
    let report = outcome.completed().expect("sweep should complete");

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.best_path, y);
    assert_eq!(result.worst_path, x);
    assert_eq!(result.best_score, 45.0);
    assert_eq!(result.worst_score, 30.0);
    assert!((result.similarity - 0.95).abs() < 1e-4);

    assert_eq!(report.discarded, vec![x.clone()]);
    let moved_to = Path::new(&x).parent().unwrap().join("DISCARDED").join("x.png");
    assert_eq!(
        report.relocations,
        vec![(x.clone(), RelocateOutcome::Moved(moved_to.clone()))]
    );
    assert!(!Path::new(&x).exists());
    assert!(moved_to.exists());
    assert!(Path::new(&y).exists());
    assert!(Path::new(&z).exists());

    assert_eq!(
        report.states,
        vec![
            PipelineState::Scanning,
            PipelineState::Hashing,
            PipelineState::Indexing,
            PipelineState::Mining,
            PipelineState::Validating,
            PipelineState::Scoring,
            PipelineState::Deciding,
            PipelineState::Relocating,
            PipelineState::Done,
        ]
    );
}

#[tokio::test]
async fn dry_run_leaves_files_alone_and_ranks_the_same() {
    let tmp = TempDir::new().unwrap();
    let (_x, _y, _z, embedder) = near_duplicate_set(tmp.path());
    let sweeper = sweeper(&config(), embedder);
    let before = dir_listing(tmp.path());

    let mut options = SweepOptions {
        dir: tmp.path().to_path_buf(),
        limit: None,
        dry_run: true,
    };
    let dry = sweeper.run(&options).await.unwrap().completed().unwrap();
    assert_eq!(dir_listing(tmp.path()), before);
    assert!(dry.relocations.is_empty());
    assert!(dry.states.contains(&PipelineState::DryRunReporting));
    assert!(!dry.states.contains(&PipelineState::Relocating));

    options.dry_run = false;
    let real = sweeper.run(&options).await.unwrap().completed().unwrap();
    assert_eq!(dry.results, real.results);
    assert_eq!(dry.discarded, real.discarded);
}

#[tokio::test]
async fn empty_directory_aborts_with_no_images() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("readme.txt"), "no pictures here").unwrap();
    let sweeper = sweeper(&config(), Arc::new(TableEmbedder::default()));

    let outcome = sweeper
        .run(&SweepOptions {
            dir: tmp.path().to_path_buf(),
            limit: None,
            dry_run: false,
        })
        .await
        .unwrap();
    match outcome {
        Outcome::Aborted { reason, at, .. } => {
            assert_eq!(reason, AbortReason::NoImages);
            assert_eq!(at, PipelineState::Scanning);
            assert_eq!(reason.to_string(), "No image files found.");
        }
        Outcome::Completed(_) => panic!("expected abort"),
    }
}

#[tokio::test]
async fn unrelated_images_abort_with_no_duplicates() {
    let tmp = TempDir::new().unwrap();
    png(tmp.path(), "a.png", 10, 10);
    png(tmp.path(), "b.png", 12, 20);
    let embedder = Arc::new(TableEmbedder::new(&[
        ("a.png", vec![1.0, 0.0, 0.0]),
        ("b.png", vec![0.0, 1.0, 0.0]),
    ]));

    let outcome = sweeper(&config(), embedder)
        .run(&SweepOptions {
            dir: tmp.path().to_path_buf(),
            limit: None,
            dry_run: true,
        })
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Aborted {
            reason: AbortReason::NoDuplicates,
            at: PipelineState::Mining,
            ..
        }
    ));
}

#[tokio::test]
async fn deleted_file_aborts_with_no_valid_pairs() {
    let tmp = TempDir::new().unwrap();
    png(tmp.path(), "a.png", 10, 10);
    png(tmp.path(), "b.png", 12, 20);
    let mut embedder = TableEmbedder::new(&[
        ("a.png", vec![1.0, 0.0, 0.0]),
        ("b.png", vec![1.0, 0.01, 0.0]),
    ]);
    embedder.vanish = vec!["b.png".to_string()];

    let outcome = sweeper(&config(), Arc::new(embedder))
        .run(&SweepOptions {
            dir: tmp.path().to_path_buf(),
            limit: None,
            dry_run: false,
        })
        .await
        .unwrap();
    match outcome {
        Outcome::Aborted { reason, at, .. } => {
            assert_eq!(reason, AbortReason::NoValidPairs);
            assert_eq!(at, PipelineState::Validating);
            assert_eq!(reason.to_string(), "No valid near duplicates pairs found.");
        }
        Outcome::Completed(_) => panic!("expected abort"),
    }
}

#[tokio::test]
async fn exact_copies_share_one_embedding_and_still_pair() {
    let tmp = TempDir::new().unwrap();
    let a = png(tmp.path(), "a.png", 16, 50);
    std::fs::copy(&a, tmp.path().join("a_copy.png")).unwrap();
    let a_copy = std::fs::canonicalize(tmp.path().join("a_copy.png"))
        .unwrap()
        .to_string_lossy()
        .to_string();
    png(tmp.path(), "b.png", 18, 90);
    let embedder = Arc::new(TableEmbedder::new(&[
        ("a.png", vec![1.0, 0.0, 0.0]),
        ("a_copy.png", vec![1.0, 0.0, 0.0]),
        ("b.png", vec![0.0, 1.0, 0.0]),
    ]));
    let sweeper = sweeper(&config(), Arc::clone(&embedder));

    let report = sweeper.run_pairs(tmp.path(), None).await.unwrap().completed().unwrap();
    assert_eq!(report.index.embedded, 2);
    assert_eq!(embedder.images.load(Ordering::SeqCst), 2);
    assert_eq!(report.pairs.len(), 1);
    assert_eq!(report.pairs[0].score, 1.0);
    assert_eq!(report.pairs[0].key(), (a.as_str(), a_copy.as_str()));
}

#[tokio::test]
async fn second_run_embeds_nothing() {
    let tmp = TempDir::new().unwrap();
    let (_x, _y, _z, embedder) = near_duplicate_set(tmp.path());
    let sweeper = sweeper(&config(), Arc::clone(&embedder));

    let first = sweeper.run_index(tmp.path()).await.unwrap().completed().unwrap();
    assert_eq!(first.index.embedded, 3);
    let after_first = embedder.images.load(Ordering::SeqCst);

    let second = sweeper.run_index(tmp.path()).await.unwrap().completed().unwrap();
    assert_eq!(embedder.images.load(Ordering::SeqCst), after_first);
    assert_eq!(second.index.embedded, 0);
    assert_eq!(second.index.unchanged, 3);
}

#[tokio::test]
async fn limit_caps_pairs() {
    let tmp = TempDir::new().unwrap();
    png(tmp.path(), "a.png", 10, 1);
    png(tmp.path(), "b.png", 11, 2);
    png(tmp.path(), "c.png", 12, 3);
    png(tmp.path(), "d.png", 13, 4);
    let embedder = Arc::new(TableEmbedder::new(&[
        ("a.png", vec![1.0, 0.0, 0.0]),
        ("b.png", vec![0.99, 0.14, 0.0]),
        ("c.png", vec![0.0, 0.0, 1.0]),
        ("d.png", vec![0.0, 0.2, 0.98]),
    ]));

    let sweeper = sweeper(&config(), embedder);
    let all = sweeper.run_pairs(tmp.path(), None).await.unwrap().completed().unwrap();
    assert_eq!(all.pairs.len(), 2);
    let one = sweeper.run_pairs(tmp.path(), Some(1)).await.unwrap().completed().unwrap();
    assert_eq!(one.pairs.len(), 1);
    assert_eq!(one.pairs[0], all.pairs[0]);
}
