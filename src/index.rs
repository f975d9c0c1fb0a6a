//! Incremental, rename-aware image index.
//!
//! [`VectorIndex`] keys every embedding by content hash, so:
//!
//! - new content is embedded exactly once;
//! - a renamed or moved file only gets its stored path rewritten;
//! - re-running [`VectorIndex::sync`] on unchanged input embeds nothing.
//!
//! Pending work is split into `chunks` roughly equal batches (default 10)
//! with one progress event per batch. A failed batch is logged and skipped;
//! its images simply stay unindexed until the next run. A batch whose
//! vectors do not have the embedder's dimensionality counts as failed.
//!
//! Entries embedded by a different model (or with a different
//! dimensionality) are stale: `sync` re-embeds them and `fetch` never
//! returns them.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use snap_sweep_core::embedding::Embedder;
use snap_sweep_core::mining::{self, MiningParams};
use snap_sweep_core::models::{EmbeddingEntry, EmbeddingMetadata, ImageRef, SimilarityPair};
use snap_sweep_core::store::{Include, VectorStore};

use crate::progress::{ProgressEvent, ProgressReporter};

/// Counts from one [`VectorIndex::sync`] call, in unique content hashes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub embedded: usize,
    pub renamed: usize,
    pub unchanged: usize,
    /// Entries from another model or dimensionality, queued for re-embedding.
    pub stale: usize,
    pub failed: usize,
}

pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunks: usize,
    write_lock: Mutex<()>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, chunks: usize) -> Self {
        Self {
            store,
            embedder,
            chunks: chunks.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Bring the index up to date with `images`.
    ///
    /// Paths sharing a hash collapse to one entry whose stored path is the
    /// lexicographically first of them.
    pub async fn sync(
        &self,
        images: &[ImageRef],
        progress: &dyn ProgressReporter,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = SyncReport::default();
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();

        let mut by_hash: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for image in images {
            by_hash
                .entry(image.content_hash.as_str())
                .or_default()
                .push(image.path.as_str());
        }
        if by_hash.is_empty() {
            return Ok(report);
        }
        for paths in by_hash.values_mut() {
            paths.sort_unstable();
        }

        let ids: Vec<String> = by_hash.keys().map(|h| h.to_string()).collect();
        let existing = self.store.get_by_ids(&ids, Include::METADATAS).await?;

        for record in &existing {
            if !record.matches(model, dims) {
                debug!(
                    id = %record.id,
                    stored_model = %record.model,
                    stored_dims = record.dims,
                    "embedded by another model, re-embedding"
                );
                report.stale += 1;
                continue;
            }
            let Some(paths) = by_hash.remove(record.id.as_str()) else {
                continue;
            };
            let stored = record.metadata.as_ref().map(|m| m.path.as_str());
            match stored {
                Some(stored) if paths.contains(&stored) => report.unchanged += 1,
                _ => {
                    let canonical = paths[0];
                    debug!(id = %record.id, from = ?stored, to = canonical, "path changed, updating metadata");
                    self.store
                        .update_metadata(&record.id, &EmbeddingMetadata::new(canonical))
                        .await?;
                    report.renamed += 1;
                }
            }
        }

        let pending: Vec<(&str, &str)> = by_hash
            .iter()
            .map(|(hash, paths)| (*hash, paths[0]))
            .collect();
        if pending.is_empty() {
            info!(unchanged = report.unchanged, renamed = report.renamed, "index up to date");
            return Ok(report);
        }

        let chunk_size = pending.len().div_ceil(self.chunks);
        let total_chunks = pending.len().div_ceil(chunk_size) as u64;
        info!(
            new = pending.len(),
            stale = report.stale,
            chunks = total_chunks,
            model,
            dims,
            "embedding images"
        );

        for (n, chunk) in pending.chunks(chunk_size).enumerate() {
            let paths: Vec<PathBuf> = chunk.iter().map(|(_, p)| PathBuf::from(p)).collect();
            let embedded = self
                .embedder
                .embed(&paths)
                .await
                .and_then(|vectors| check_batch(vectors, chunk.len(), dims));
            match embedded {
                Ok(vectors) => {
                    for ((hash, path), vector) in chunk.iter().zip(vectors) {
                        self.store
                            .upsert(&EmbeddingEntry::new(*hash, vector, *path, model))
                            .await?;
                    }
                    report.embedded += chunk.len();
                }
                Err(e) => {
                    warn!(error = %e, images = chunk.len(), "embedding chunk failed, skipped");
                    report.failed += chunk.len();
                }
            }
            progress.report(ProgressEvent::Embedding {
                n: n as u64 + 1,
                total: total_chunks,
            });
        }

        Ok(report)
    }

    /// Load entries for `hashes`, in order.
    ///
    /// Unknown ids are skipped, and so are entries embedded by another model
    /// or with another dimensionality.
    pub async fn fetch(&self, hashes: &[String]) -> Result<Vec<EmbeddingEntry>> {
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();
        let records = self.store.get_by_ids(hashes, Include::ALL).await?;

        let mut entries = Vec::with_capacity(records.len());
        let mut mismatched = 0usize;
        for record in records {
            let current = record.matches(model, dims);
            match (record.vector, record.metadata) {
                (Some(vector), Some(metadata)) if current && vector.len() == dims => {
                    entries.push(EmbeddingEntry {
                        id: record.id,
                        vector,
                        metadata,
                        model: record.model,
                    });
                }
                _ => mismatched += 1,
            }
        }
        if mismatched > 0 {
            warn!(
                mismatched,
                model, dims, "index entries from another model left out"
            );
        }
        Ok(entries)
    }

    /// Fetch `hashes` and mine them for near-duplicate pairs.
    pub async fn search(
        &self,
        hashes: &[String],
        params: &MiningParams,
        threshold: f64,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarityPair>> {
        let (vectors, metadatas): (Vec<Vec<f32>>, Vec<EmbeddingMetadata>) = self
            .fetch(hashes)
            .await?
            .into_iter()
            .map(|entry| (entry.vector, entry.metadata))
            .unzip();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            mining::search(&vectors, &metadatas, &params, threshold, limit)
        })
        .await?
    }
}

/// Reject a batch with the wrong vector count, dimensionality, or any
/// non-finite component.
fn check_batch(vectors: Vec<Vec<f32>>, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "embedder returned {} vectors for {} images",
            vectors.len(),
            expected
        );
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "embedder returned a {}-dimensional vector, expected {} (check embedding.dims)",
            v.len(),
            dims
        );
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        bail!("embedder returned a non-finite vector component");
    }
    Ok(vectors)
}
