//! In-memory [`VectorStore`] implementation for tests and ephemeral runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{EmbeddingEntry, EmbeddingMetadata};

use super::{Include, VectorRecord, VectorStore};

struct StoredVector {
    vector: Vec<f32>,
    metadata: EmbeddingMetadata,
    model: String,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entry: &EmbeddingEntry) -> Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        vectors.insert(
            entry.id.clone(),
            StoredVector {
                vector: entry.vector.clone(),
                metadata: entry.metadata.clone(),
                model: entry.model.clone(),
            },
        );
        Ok(())
    }

    async fn get_by_ids(&self, ids: &[String], include: Include) -> Result<Vec<VectorRecord>> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                vectors.get(id).map(|stored| VectorRecord {
                    id: id.clone(),
                    model: stored.model.clone(),
                    dims: stored.vector.len(),
                    vector: include.embeddings.then(|| stored.vector.clone()),
                    metadata: include.metadatas.then(|| stored.metadata.clone()),
                })
            })
            .collect())
    }

    async fn update_metadata(&self, id: &str, metadata: &EmbeddingMetadata) -> Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        match vectors.get_mut(id) {
            Some(stored) => {
                stored.metadata = metadata.clone();
                Ok(())
            }
            None => bail!("no vector stored for id {}", id),
        }
    }

    async fn count(&self) -> Result<usize> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        Ok(vectors.len())
    }
}
