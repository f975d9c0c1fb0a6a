//! Core data types that flow through the duplicate-detection pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A scanned file and its content fingerprint.
///
/// Identity is the `content_hash`; the `path` may change between runs
/// without requiring a new embedding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: String,
    pub content_hash: String,
}

impl ImageRef {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
        }
    }
}

/// Metadata stored alongside each vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub path: String,
}

impl EmbeddingMetadata {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// One indexed image: content hash, embedding vector, and current path.
///
/// `model` names the embedder that produced `vector`; vectors from
/// different models are never compared.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
    pub model: String,
}

impl EmbeddingEntry {
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        path: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: EmbeddingMetadata::new(path),
            model: model.into(),
        }
    }

    pub fn dims(&self) -> usize {
        self.vector.len()
    }
}

/// An unordered near-duplicate pair discovered by mining.
///
/// `path_a` and `path_b` are always distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    /// Cosine similarity of the two embeddings.
    pub score: f32,
    pub path_a: String,
    pub path_b: String,
}

impl SimilarityPair {
    /// Build a pair, returning `None` when both sides name the same path.
    pub fn new(score: f32, path_a: impl Into<String>, path_b: impl Into<String>) -> Option<Self> {
        let path_a = path_a.into();
        let path_b = path_b.into();
        if path_a == path_b {
            return None;
        }
        Some(Self {
            score,
            path_a,
            path_b,
        })
    }

    /// The pair's paths in lexicographic order, for unordered comparisons.
    pub fn key(&self) -> (&str, &str) {
        if self.path_a <= self.path_b {
            (&self.path_a, &self.path_b)
        } else {
            (&self.path_b, &self.path_a)
        }
    }
}

/// Outcome of comparing the quality of both images in a pair.
///
/// Invariant: `best_score >= worst_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub best_path: String,
    pub worst_path: String,
    pub best_score: f64,
    pub worst_score: f64,
    pub similarity: f32,
}

impl ComparisonResult {
    /// Rank two scored images. On a tie the first image is kept as best.
    pub fn rank(
        first: (String, f64),
        second: (String, f64),
        similarity: f32,
    ) -> Self {
        let (best, worst) = if second.1 > first.1 {
            (second, first)
        } else {
            (first, second)
        };
        Self {
            best_path: best.0,
            worst_path: worst.0,
            best_score: best.1,
            worst_score: worst.1,
            similarity,
        }
    }
}

/// Paths that lost at least one quality comparison.
pub type DiscardSet = BTreeSet<String>;

/// Collect every `worst_path` into a [`DiscardSet`].
pub fn discard_set(results: &[ComparisonResult]) -> DiscardSet {
    results.iter().map(|r| r.worst_path.clone()).collect()
}
