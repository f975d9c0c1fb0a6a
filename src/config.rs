//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an absent config file yields a working
//! setup ([`Config::default`]). CLI flags override individual fields after
//! loading.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub relocate: RelocateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/snapsweep.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint for the `http` provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Number of roughly equal chunks the pending work is split into.
    #[serde(default = "default_chunks")]
    pub chunks: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: None,
            url: None,
            chunks: default_chunks(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "clip-vit-b-32".to_string()
}
fn default_chunks() -> usize {
    10
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct MiningConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    #[serde(default = "default_query_chunk_size")]
    pub query_chunk_size: usize,
    #[serde(default = "default_corpus_chunk_size")]
    pub corpus_chunk_size: usize,
    /// Pair byte-identical files (same content hash) at score 1.0.
    #[serde(default = "default_true")]
    pub include_exact_copies: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            max_pairs: default_max_pairs(),
            query_chunk_size: default_query_chunk_size(),
            corpus_chunk_size: default_corpus_chunk_size(),
            include_exact_copies: true,
        }
    }
}

impl MiningConfig {
    pub fn params(&self) -> snap_sweep_core::mining::MiningParams {
        snap_sweep_core::mining::MiningParams {
            top_k: self.top_k,
            max_pairs: self.max_pairs,
            query_chunk_size: self.query_chunk_size,
            corpus_chunk_size: self.corpus_chunk_size,
        }
    }
}

fn default_top_k() -> usize {
    2
}
fn default_threshold() -> f64 {
    0.9
}
fn default_max_pairs() -> usize {
    500_000
}
fn default_query_chunk_size() -> usize {
    5_000
}
fn default_corpus_chunk_size() -> usize {
    100_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub include_subdirs: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_subdirs: true,
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_scorer")]
    pub scorer: String,
    /// Longest side in pixels before scoring; `0` keeps the original size.
    #[serde(default = "default_resize")]
    pub resize: u32,
    /// In-flight pair comparisons; defaults to twice the CPU count.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_quality_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            scorer: default_scorer(),
            resize: default_resize(),
            max_concurrency: None,
            chunk_size: default_quality_chunk_size(),
            cache_entries: default_cache_entries(),
        }
    }
}

impl QualityConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(default_workers).max(1)
    }
}

fn default_scorer() -> String {
    "sharpness".to_string()
}
fn default_resize() -> u32 {
    512
}
fn default_quality_chunk_size() -> usize {
    10
}
fn default_cache_entries() -> usize {
    64
}

/// Twice the number of logical CPUs.
pub fn default_workers() -> usize {
    num_cpus::get().max(1) * 2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelocateConfig {
    #[serde(default = "default_subfolder")]
    pub subfolder: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl Default for RelocateConfig {
    fn default() -> Self {
        Self {
            subfolder: default_subfolder(),
            mode: default_mode(),
            max_workers: None,
        }
    }
}

impl RelocateConfig {
    pub fn effective_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_workers).max(1)
    }
}

fn default_subfolder() -> String {
    "DISCARDED".to_string()
}
fn default_mode() -> String {
    "move".to_string()
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists; fall back to defaults when `required` is false.
pub fn load_or_default(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        return Ok(Config::default());
    }
    load_config(path)
}

/// Check value ranges. Also called after CLI overrides are applied.
pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.mining.threshold) {
        anyhow::bail!("mining.threshold must be in [0.0, 1.0]");
    }
    if config.mining.max_pairs == 0 {
        anyhow::bail!("mining.max_pairs must be >= 1");
    }
    if config.mining.query_chunk_size == 0 || config.mining.corpus_chunk_size == 0 {
        anyhow::bail!("mining chunk sizes must be >= 1");
    }
    if config.embedding.chunks == 0 {
        anyhow::bail!("embedding.chunks must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    if config.quality.chunk_size == 0 {
        anyhow::bail!("quality.chunk_size must be >= 1");
    }
    if config.relocate.subfolder.trim().is_empty()
        || config.relocate.subfolder.contains(['/', '\\'])
    {
        anyhow::bail!("relocate.subfolder must be a single folder name");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "http" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or http.",
            other
        ),
    }
    if config.embedding.provider == "http" && config.embedding.url.is_none() {
        anyhow::bail!("embedding.url must be specified when provider is 'http'");
    }

    match config.quality.scorer.as_str() {
        "sharpness" | "composite" => {}
        other => anyhow::bail!(
            "Unknown quality scorer: '{}'. Must be sharpness or composite.",
            other
        ),
    }

    match config.relocate.mode.as_str() {
        "move" | "copy" => {}
        other => anyhow::bail!("Unknown relocate mode: '{}'. Must be move or copy.", other),
    }

    Ok(())
}
