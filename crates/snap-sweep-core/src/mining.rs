//! Chunked, memory-bounded near-duplicate mining over embedding vectors.
//!
//! # Algorithm
//!
//! 1. Normalize every vector to unit length so cosine similarity is a dot product.
//! 2. Walk the corpus in blocks of `corpus_chunk_size`; for each corpus block walk
//!    all vectors in blocks of `query_chunk_size` as the query side.
//! 3. Score each query row against the corpus block and keep its `top_k + 1`
//!    best columns (the extra slot absorbs the row's self-match when the blocks
//!    overlap). Equal scores prefer the lower column index.
//! 4. Feed every `(score, i, j)` with `i != j` into a [`BoundedPairHeap`] capped at
//!    `max_pairs`. Once full, each admission evicts the current minimum and raises
//!    the admission floor to the evicted score.
//! 5. Drain the heap, canonicalize to `(min(i, j), max(i, j))`, drop repeats, map
//!    indices to paths, and sort by score descending.
//!
//! Query-side chunking never changes the result. Corpus-side chunking lets a row
//! contribute up to `top_k + 1` candidates per corpus block, a superset of what a
//! single full matrix would offer; the heap still keeps the exact best
//! `max_pairs` among them. Rows of a block are scored in parallel; the heap is
//! only touched from the calling thread.
//!
//! The caller's threshold is applied by [`apply_threshold`], which compares the
//! score rounded to two decimals (half away from zero) against the threshold.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use anyhow::{bail, Result};
use rayon::prelude::*;

use crate::embedding::{dot, normalize};
use crate::models::{EmbeddingMetadata, SimilarityPair};

/// Tuning knobs for [`mine_pairs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningParams {
    /// Neighbours kept per query row and corpus block (excluding the self-match).
    pub top_k: usize,
    /// Capacity of the global candidate heap.
    pub max_pairs: usize,
    pub query_chunk_size: usize,
    pub corpus_chunk_size: usize,
}

impl Default for MiningParams {
    fn default() -> Self {
        Self {
            top_k: 2,
            max_pairs: 500_000,
            query_chunk_size: 5_000,
            corpus_chunk_size: 100_000,
        }
    }
}

impl MiningParams {
    fn validate(&self) -> Result<()> {
        if self.max_pairs == 0 {
            bail!("max_pairs must be >= 1");
        }
        if self.query_chunk_size == 0 || self.corpus_chunk_size == 0 {
            bail!("query_chunk_size and corpus_chunk_size must be >= 1");
        }
        Ok(())
    }
}

/// A scored `(query, corpus)` index pair.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub score: f32,
    pub i: usize,
    pub j: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.i.cmp(&other.i))
            .then_with(|| self.j.cmp(&other.j))
    }
}

/// Fixed-capacity min-heap of candidates with a rising admission floor.
///
/// Never holds more than `capacity` entries: when full, a newcomer either
/// loses to the current minimum or replaces it.
#[derive(Debug)]
pub struct BoundedPairHeap {
    heap: BinaryHeap<Reverse<Candidate>>,
    capacity: usize,
    min_score: f32,
}

impl BoundedPairHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(1 << 20)),
            capacity,
            min_score: f32::NEG_INFINITY,
        }
    }

    /// Scores at or below this value are rejected without touching the heap.
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a candidate. Returns `true` if it was admitted.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if self.capacity == 0 || candidate.score <= self.min_score {
            return false;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(candidate));
            return true;
        }

        let Some(Reverse(current_min)) = self.heap.peek().copied() else {
            return false;
        };
        if candidate <= current_min {
            self.min_score = candidate.score;
            return false;
        }
        self.heap.pop();
        self.min_score = current_min.score;
        self.heap.push(Reverse(candidate));
        true
    }

    /// Drain into a vector ordered from highest to lowest.
    pub fn into_sorted_desc(self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }
}

/// Mine near-duplicate pairs from `vectors`, labelling them with `metadatas`.
///
/// Returns each unordered pair at most once, sorted by score descending
/// (then by paths). No threshold is applied here; see [`search`].
///
/// # Errors
///
/// Fails on invalid parameters, mismatched input lengths, inconsistent
/// dimensionality, or non-finite vector components.
pub fn mine_pairs(
    vectors: &[Vec<f32>],
    metadatas: &[EmbeddingMetadata],
    params: &MiningParams,
) -> Result<Vec<SimilarityPair>> {
    params.validate()?;
    if vectors.len() != metadatas.len() {
        bail!(
            "got {} vectors but {} metadata entries",
            vectors.len(),
            metadatas.len()
        );
    }
    let n = vectors.len();
    if n < 2 {
        return Ok(Vec::new());
    }

    let dims = vectors[0].len();
    for (idx, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            bail!(
                "vector {} has {} dimensions, expected {}",
                idx,
                v.len(),
                dims
            );
        }
        if v.iter().any(|x| !x.is_finite()) {
            bail!("vector {} contains non-finite values", idx);
        }
    }

    let unit: Vec<Vec<f32>> = vectors.iter().map(|v| normalize(v)).collect();
    let heap = select_candidates(&unit, params);

    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut pairs = Vec::new();
    for c in heap.into_sorted_desc() {
        let (a, b) = if c.i <= c.j { (c.i, c.j) } else { (c.j, c.i) };
        if a == b || !seen.insert((a, b)) {
            continue;
        }
        if let Some(pair) =
            SimilarityPair::new(c.score, metadatas[a].path.clone(), metadatas[b].path.clone())
        {
            pairs.push(pair);
        }
    }

    sort_pairs(&mut pairs);
    Ok(pairs)
}

/// Run the chunked top-k scan over unit vectors and return the filled heap.
fn select_candidates(unit: &[Vec<f32>], params: &MiningParams) -> BoundedPairHeap {
    let n = unit.len();
    let per_row = params.top_k.saturating_add(1);
    let mut heap = BoundedPairHeap::new(params.max_pairs);

    for corpus_start in (0..n).step_by(params.corpus_chunk_size) {
        let corpus_end = (corpus_start + params.corpus_chunk_size).min(n);
        let corpus = &unit[corpus_start..corpus_end];
        let take = per_row.min(corpus.len());

        for query_start in (0..n).step_by(params.query_chunk_size) {
            let query_end = (query_start + params.query_chunk_size).min(n);

            let block: Vec<Vec<(usize, f32)>> = unit[query_start..query_end]
                .par_iter()
                .map(|query| {
                    let row: Vec<f32> = corpus.iter().map(|c| dot(query, c)).collect();
                    top_columns(&row, take)
                        .into_iter()
                        .map(|col| (col, row[col]))
                        .collect()
                })
                .collect();

            for (row_offset, columns) in block.into_iter().enumerate() {
                let i = query_start + row_offset;
                for (col, score) in columns {
                    let j = corpus_start + col;
                    if i != j && score > heap.min_score() {
                        heap.push(Candidate { score, i, j });
                    }
                }
            }
        }
    }

    heap
}

/// Indices of the `take` highest scores in `row`; ties go to the lower index.
fn top_columns(row: &[f32], take: usize) -> Vec<usize> {
    if take == 0 {
        return Vec::new();
    }
    let mut idx: Vec<usize> = (0..row.len()).collect();
    let by_score_desc = |a: &usize, b: &usize| row[*b].total_cmp(&row[*a]).then_with(|| a.cmp(b));
    if take < idx.len() {
        idx.select_nth_unstable_by(take - 1, by_score_desc);
        idx.truncate(take);
    }
    idx
}

/// Sort by score descending, then by paths for a stable presentation.
pub fn sort_pairs(pairs: &mut [SimilarityPair]) {
    pairs.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.path_a.cmp(&b.path_a))
            .then_with(|| a.path_b.cmp(&b.path_b))
    });
}

/// Round a similarity score to two decimals, half away from zero.
pub fn round2(score: f32) -> f64 {
    (f64::from(score) * 100.0).round() / 100.0
}

/// Keep pairs whose rounded score reaches `threshold`, then cap at `limit`.
pub fn apply_threshold(
    pairs: Vec<SimilarityPair>,
    threshold: f64,
    limit: Option<usize>,
) -> Vec<SimilarityPair> {
    let mut kept: Vec<SimilarityPair> = pairs
        .into_iter()
        .filter(|p| round2(p.score) >= threshold)
        .collect();
    if let Some(limit) = limit {
        kept.truncate(limit);
    }
    kept
}

/// Mine, threshold, and limit in one call.
pub fn search(
    vectors: &[Vec<f32>],
    metadatas: &[EmbeddingMetadata],
    params: &MiningParams,
    threshold: f64,
    limit: Option<usize>,
) -> Result<Vec<SimilarityPair>> {
    let pairs = mine_pairs(vectors, metadatas, params)?;
    Ok(apply_threshold(pairs, threshold, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metas(n: usize) -> Vec<EmbeddingMetadata> {
        (0..n)
            .map(|i| EmbeddingMetadata::new(format!("/img/{:03}.jpg", i)))
            .collect()
    }

    /// Deterministic pseudo-random vectors (LCG), values in [-1, 1).
    fn lcg_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                (0..dims)
                    .map(|_| {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
                    })
                    .collect()
            })
            .collect()
    }

    fn three_vectors() -> Vec<Vec<f32>> {
        // cos(v1,v2)=0.95, cos(v1,v3)=0.5, cos(v2,v3)=0.4
        let s2 = (1.0f32 - 0.95 * 0.95).sqrt();
        let y3 = (0.4 - 0.95 * 0.5) / s2;
        let z3 = (1.0 - 0.25 - y3 * y3).sqrt();
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.95, s2, 0.0],
            vec![0.5, y3, z3],
        ]
    }

    #[test]
    fn three_images_one_pair_above_threshold() {
        let params = MiningParams {
            top_k: 2,
            ..MiningParams::default()
        };
        let pairs = search(&three_vectors(), &metas(3), &params, 0.9, None).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].score - 0.95).abs() < 1e-5);
        assert_eq!(pairs[0].path_a, "/img/000.jpg");
        assert_eq!(pairs[0].path_b, "/img/001.jpg");
    }

    #[test]
    fn all_pairs_listed_once_without_threshold() {
        let pairs = mine_pairs(&three_vectors(), &metas(3), &MiningParams::default()).unwrap();
        assert_eq!(pairs.len(), 3);
        let scores: Vec<f32> = pairs.iter().map(|p| p.score).collect();
        assert!((scores[0] - 0.95).abs() < 1e-5);
        assert!((scores[1] - 0.5).abs() < 1e-5);
        assert!((scores[2] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn output_is_unique_and_sorted() {
        let vectors = lcg_vectors(40, 8, 7);
        let params = MiningParams {
            top_k: 5,
            max_pairs: 1_000,
            query_chunk_size: 7,
            corpus_chunk_size: 11,
        };
        let pairs = mine_pairs(&vectors, &metas(40), &params).unwrap();
        assert!(!pairs.is_empty());

        let mut keys = HashSet::new();
        for p in &pairs {
            assert_ne!(p.path_a, p.path_b);
            assert!(keys.insert(p.key()), "duplicate pair {:?}", p.key());
        }
        for w in pairs.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn query_chunking_does_not_change_result() {
        let vectors = lcg_vectors(30, 6, 42);
        let base = MiningParams {
            top_k: 3,
            max_pairs: 10_000,
            query_chunk_size: 1_000,
            corpus_chunk_size: 1_000,
        };
        let full = mine_pairs(&vectors, &metas(30), &base).unwrap();
        for q in [1, 4, 7, 29] {
            let chunked = mine_pairs(
                &vectors,
                &metas(30),
                &MiningParams {
                    query_chunk_size: q,
                    ..base.clone()
                },
            )
            .unwrap();
            assert_eq!(full, chunked, "query_chunk_size={}", q);
        }
    }

    #[test]
    fn corpus_chunking_keeps_strong_pairs() {
        // Two tight clusters of near-identical vectors plus noise.
        let mut vectors = lcg_vectors(20, 16, 3);
        vectors[15] = vectors[2].iter().map(|x| x * 1.01).collect();
        vectors[9] = vectors[17].iter().map(|x| x + 0.001).collect();

        let base = MiningParams {
            top_k: 2,
            max_pairs: 10_000,
            query_chunk_size: 1_000,
            corpus_chunk_size: 1_000,
        };
        let full = search(&vectors, &metas(20), &base, 0.99, None).unwrap();
        let chunked = search(
            &vectors,
            &metas(20),
            &MiningParams {
                corpus_chunk_size: 6,
                query_chunk_size: 5,
                ..base
            },
            0.99,
            None,
        )
        .unwrap();
        assert_eq!(full.len(), 2);
        let full_keys: Vec<_> = full.iter().map(|p| p.key()).collect();
        let chunked_keys: Vec<_> = chunked.iter().map(|p| p.key()).collect();
        assert_eq!(full_keys, chunked_keys);
    }

    #[test]
    fn max_pairs_keeps_the_best() {
        let vectors = lcg_vectors(25, 5, 11);
        let unbounded = mine_pairs(
            &vectors,
            &metas(25),
            &MiningParams {
                top_k: 24,
                max_pairs: 100_000,
                ..MiningParams::default()
            },
        )
        .unwrap();
        let bounded = mine_pairs(
            &vectors,
            &metas(25),
            &MiningParams {
                top_k: 24,
                max_pairs: 10,
                ..MiningParams::default()
            },
        )
        .unwrap();

        assert!(bounded.len() <= 10);
        assert!(!bounded.is_empty());
        // The heap sees both directions of each pair, so 10 slots hold at least 5 distinct pairs.
        let top = &unbounded[..bounded.len()];
        for (b, u) in bounded.iter().zip(top.iter()) {
            assert!((b.score - u.score).abs() < 1e-6);
        }
    }

    #[test]
    fn heap_never_exceeds_capacity() {
        let mut heap = BoundedPairHeap::new(4);
        let scores = [0.1, 0.9, 0.3, 0.8, 0.5, 0.95, 0.2, 0.7, 0.99, 0.4];
        for (n, s) in scores.iter().enumerate() {
            heap.push(Candidate {
                score: *s,
                i: n,
                j: n + 100,
            });
            assert!(heap.len() <= 4);
        }
        let kept: Vec<f32> = heap.into_sorted_desc().iter().map(|c| c.score).collect();
        assert_eq!(kept, vec![0.99, 0.95, 0.9, 0.8]);
    }

    #[test]
    fn heap_floor_rises_on_eviction() {
        let mut heap = BoundedPairHeap::new(2);
        assert_eq!(heap.min_score(), f32::NEG_INFINITY);
        heap.push(Candidate { score: 0.5, i: 0, j: 1 });
        heap.push(Candidate { score: 0.6, i: 0, j: 2 });
        assert_eq!(heap.min_score(), f32::NEG_INFINITY);
        assert!(heap.push(Candidate { score: 0.7, i: 0, j: 3 }));
        assert_eq!(heap.min_score(), 0.5);
        assert!(!heap.push(Candidate { score: 0.5, i: 9, j: 9 }));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn threshold_uses_two_decimal_rounding() {
        let pairs = vec![
            SimilarityPair::new(0.8951, "/a", "/b").unwrap(),
            SimilarityPair::new(0.895, "/c", "/d").unwrap(),
            SimilarityPair::new(0.85, "/e", "/f").unwrap(),
        ];
        let kept = apply_threshold(pairs, 0.9, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path_a, "/a");
    }

    #[test]
    fn limit_applies_after_threshold() {
        let pairs = vec![
            SimilarityPair::new(0.99, "/a", "/b").unwrap(),
            SimilarityPair::new(0.5, "/c", "/d").unwrap(),
            SimilarityPair::new(0.97, "/e", "/f").unwrap(),
            SimilarityPair::new(0.93, "/g", "/h").unwrap(),
        ];
        let kept = apply_threshold(pairs, 0.9, Some(2));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].path_a, "/a");
        assert_eq!(kept[1].path_a, "/e");
    }

    #[test]
    fn identical_vectors_pair_at_one() {
        let vectors = vec![vec![0.2, 0.4], vec![0.2, 0.4], vec![-1.0, 0.3]];
        let pairs = search(&vectors, &metas(3), &MiningParams::default(), 0.9, None).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(round2(pairs[0].score), 1.0);
    }

    #[test]
    fn fewer_than_two_vectors_yield_nothing() {
        assert!(mine_pairs(&[], &[], &MiningParams::default())
            .unwrap()
            .is_empty());
        assert!(mine_pairs(&[vec![1.0]], &metas(1), &MiningParams::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(mine_pairs(&[vec![1.0], vec![1.0, 2.0]], &metas(2), &MiningParams::default()).is_err());
        assert!(mine_pairs(&[vec![1.0], vec![1.0]], &metas(3), &MiningParams::default()).is_err());
        assert!(mine_pairs(&[vec![f32::NAN], vec![1.0]], &metas(2), &MiningParams::default()).is_err());
        let zero = MiningParams {
            max_pairs: 0,
            ..MiningParams::default()
        };
        assert!(mine_pairs(&[vec![1.0], vec![1.0]], &metas(2), &zero).is_err());
    }

    #[test]
    fn top_columns_prefers_lower_index_on_ties() {
        let row = [0.5, 0.9, 0.5, 0.9, 0.1];
        let mut cols = top_columns(&row, 3);
        cols.sort();
        assert_eq!(cols, vec![0, 1, 3]);
    }
}
