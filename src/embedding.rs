//! Image embedders.
//!
//! Concrete implementations of [`Embedder`]:
//! - **[`DisabledEmbedder`]**: always errors; `embedding.provider = "disabled"`.
//! - **[`HttpEmbedder`]**: posts base64-encoded image bytes to a configured
//!   endpoint, with retry and backoff.
//! - **[`LocalEmbedder`]**: CLIP-family image models run in-process with
//!   fastembed (feature `local-embeddings`).
//!
//! # Retry Strategy
//!
//! The HTTP embedder uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! Backoff delays: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5 seconds).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::EmbeddingConfig;
pub use snap_sweep_core::embedding::Embedder;

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        bail!("Embeddings are disabled (embedding.provider = \"disabled\")")
    }
}

// ============ HTTP ============

/// Embedder backed by an HTTP service.
///
/// Request: `POST {url}` with `{"model": ..., "images": [base64, ...]}`.
/// Response: `{"embeddings": [[f32, ...], ...]}` in request order.
pub struct HttpEmbedder {
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for http provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url,
            model: config.model.clone(),
            dims: config.dims.unwrap_or_else(|| default_dims(&config.model)),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            images.push(base64::engine::general_purpose::STANDARD.encode(bytes));
        }

        let body = serde_json::json!({
            "model": self.model,
            "images": images,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings(&json, paths.len());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding service error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Extract `embeddings[][]` and check it has one vector per image.
fn parse_embeddings(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embeddings array"))?;

    if data.len() != expected {
        bail!(
            "Embedding response has {} vectors for {} images",
            data.len(),
            expected
        );
    }

    data.iter()
        .map(|item| {
            let values = item
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: vector is not an array"))?;
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: non-numeric value"))
                })
                .collect()
        })
        .collect()
}

// ============ Local (fastembed) ============

/// In-process image embedder.
///
/// The model is downloaded on first use from Hugging Face and cached; it is
/// loaded once per embedder and reused for every batch.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::ImageEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        to_fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims.unwrap_or_else(|| default_dims(&config.model)),
            batch_size: config.batch_size,
            model: Default::default(),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let model_slot = std::sync::Arc::clone(&self.model);
        let model_kind = to_fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let paths = paths.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut slot = model_slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if slot.is_none() {
                let model = fastembed::ImageEmbedding::try_new(
                    fastembed::ImageInitOptions::new(model_kind).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *slot = Some(model);
            }
            let model = slot
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;

            model
                .embed(paths, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings")]
fn to_fastembed_model(name: &str) -> Result<fastembed::ImageEmbeddingModel> {
    match name {
        "clip-vit-b-32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
        "resnet50" => Ok(fastembed::ImageEmbeddingModel::Resnet50),
        "unicom-vit-b-16" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB16),
        "unicom-vit-b-32" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB32),
        "nomic-embed-vision-v1.5" => Ok(fastembed::ImageEmbeddingModel::NomicEmbedVisionV15),
        other => bail!(
            "Unknown local image model: '{}'. Supported models: \
             clip-vit-b-32, resnet50, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
            other
        ),
    }
}

fn default_dims(model: &str) -> usize {
    match model {
        "resnet50" => 2048,
        "unicom-vit-b-16" | "nomic-embed-vision-v1.5" => 768,
        _ => 512,
    }
}

/// Create the [`Embedder`] named by `embedding.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"http"` | [`HttpEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_embedder_errors() {
        let embedder = create_embedder(&EmbeddingConfig {
            provider: "disabled".into(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(embedder.embed(&[PathBuf::from("/x.png")]).await.is_err());
    }

    #[test]
    fn http_embedder_needs_url() {
        let config = EmbeddingConfig {
            provider: "http".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());

        let config = EmbeddingConfig {
            provider: "http".into(),
            url: Some("http://127.0.0.1:9/embed".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 512);
    }

    #[test]
    fn parse_embeddings_checks_shape() {
        let ok = serde_json::json!({"embeddings": [[1.0, 0.5], [0.0, -1.0]]});
        let vectors = parse_embeddings(&ok, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.5], vec![0.0, -1.0]]);

        assert!(parse_embeddings(&ok, 3).is_err());
        assert!(parse_embeddings(&serde_json::json!({"data": []}), 0).is_err());
        let bad = serde_json::json!({"embeddings": [["x"]]});
        assert!(parse_embeddings(&bad, 1).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "magic".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
