//! Vector store abstraction for the image index.
//!
//! The [`VectorStore`] trait is the persistence boundary of the index:
//! upsert an [`EmbeddingEntry`] by content hash, fetch records by id, and
//! update the path metadata of an existing record without touching its
//! vector. Every record remembers the model and dimensionality it was
//! embedded with.
//! Backends: SQLite (app crate) and [`memory::InMemoryVectorStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EmbeddingEntry, EmbeddingMetadata};

/// Which optional fields [`VectorStore::get_by_ids`] should populate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Include {
    pub embeddings: bool,
    pub metadatas: bool,
}

impl Include {
    /// Only ids; used for existence checks.
    pub const IDS: Include = Include {
        embeddings: false,
        metadatas: false,
    };
    pub const METADATAS: Include = Include {
        embeddings: false,
        metadatas: true,
    };
    pub const ALL: Include = Include {
        embeddings: true,
        metadatas: true,
    };
}

/// A record returned by [`VectorStore::get_by_ids`].
///
/// `model` and `dims` are always populated, whatever the [`Include`] flags.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Content hash.
    pub id: String,
    pub model: String,
    pub dims: usize,
    pub vector: Option<Vec<f32>>,
    pub metadata: Option<EmbeddingMetadata>,
}

impl VectorRecord {
    /// True when the record was produced by `model` with `dims` dimensions.
    pub fn matches(&self, model: &str, dims: usize) -> bool {
        self.model == model && self.dims == dims
    }
}

/// Abstract persistent vector store keyed by content hash.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace an entry |
/// | [`get_by_ids`](VectorStore::get_by_ids) | Bulk fetch, in request order, skipping unknown ids |
/// | [`update_metadata`](VectorStore::update_metadata) | Replace metadata only |
/// | [`count`](VectorStore::count) | Number of stored records |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, entry: &EmbeddingEntry) -> Result<()>;

    async fn get_by_ids(&self, ids: &[String], include: Include) -> Result<Vec<VectorRecord>>;

    /// Fails if `id` is not present.
    async fn update_metadata(&self, id: &str, metadata: &EmbeddingMetadata) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
