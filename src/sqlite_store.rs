//! SQLite-backed [`VectorStore`] for the persistent image index.
//!
//! One row per content hash in `image_embeddings`; vectors are stored as
//! little-endian f32 blobs (see [`vec_to_blob`]) next to the model name and
//! dimensionality they were produced with.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use snap_sweep_core::embedding::{blob_to_vec, vec_to_blob};
use snap_sweep_core::models::{EmbeddingEntry, EmbeddingMetadata};
use snap_sweep_core::store::{Include, VectorRecord, VectorStore};

/// Ids per `IN (...)` query, under SQLite's bound-parameter limit.
const ID_BATCH: usize = 500;

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, entry: &EmbeddingEntry) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(&entry.vector);

        sqlx::query(
            r#"
            INSERT INTO image_embeddings (id, path, embedding, dims, model, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                embedding = excluded.embedding,
                dims = excluded.dims,
                model = excluded.model,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.metadata.path)
        .bind(blob)
        .bind(entry.dims() as i64)
        .bind(&entry.model)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert embedding {}", entry.id))?;

        Ok(())
    }

    async fn get_by_ids(&self, ids: &[String], include: Include) -> Result<Vec<VectorRecord>> {
        let columns = if include.embeddings {
            "id, path, dims, model, embedding"
        } else {
            "id, path, dims, model"
        };

        let mut found: HashMap<String, VectorRecord> = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(ID_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM image_embeddings WHERE id IN ({})",
                columns, placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;

            for row in rows {
                let id: String = row.get("id");
                let dims: i64 = row.get("dims");
                let model: String = row.get("model");
                let vector = if include.embeddings {
                    let blob: Vec<u8> = row.get("embedding");
                    Some(blob_to_vec(&blob))
                } else {
                    None
                };
                let metadata = if include.metadatas {
                    let path: String = row.get("path");
                    Some(EmbeddingMetadata::new(path))
                } else {
                    None
                };
                found.insert(
                    id.clone(),
                    VectorRecord {
                        id,
                        model,
                        dims: dims as usize,
                        vector,
                        metadata,
                    },
                );
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn update_metadata(&self, id: &str, metadata: &EmbeddingMetadata) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE image_embeddings SET path = ?, updated_at = ? WHERE id = ?")
            .bind(&metadata.path)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            bail!("No index entry with id {}", id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteVectorStore {
        let pool = db::connect_path(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    #[tokio::test]
    async fn upsert_then_fetch_in_request_order() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        store
            .upsert(&EmbeddingEntry::new("h1", vec![1.0, 0.0], "/a.png", "test-model"))
            .await
            .unwrap();
        store
            .upsert(&EmbeddingEntry::new("h2", vec![0.0, 1.0], "/b.png", "test-model"))
            .await
            .unwrap();

        let ids = vec!["h2".to_string(), "missing".to_string(), "h1".to_string()];
        let records = store.get_by_ids(&ids, Include::ALL).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "h2");
        assert_eq!(records[0].vector.as_deref(), Some(&[0.0f32, 1.0][..]));
        assert_eq!(records[1].metadata, Some(EmbeddingMetadata::new("/a.png")));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn include_flags_limit_columns() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store
            .upsert(&EmbeddingEntry::new("h1", vec![0.5], "/a.png", "test-model"))
            .await
            .unwrap();

        let records = store
            .get_by_ids(&["h1".to_string()], Include::IDS)
            .await
            .unwrap();
        assert_eq!(records[0].vector, None);
        assert_eq!(records[0].metadata, None);
        assert!(records[0].matches("test-model", 1));
    }

    #[tokio::test]
    async fn update_metadata_keeps_vector() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store
            .upsert(&EmbeddingEntry::new("h1", vec![0.25, 0.75], "/old.png", "test-model"))
            .await
            .unwrap();

        store
            .update_metadata("h1", &EmbeddingMetadata::new("/new.png"))
            .await
            .unwrap();

        let records = store
            .get_by_ids(&["h1".to_string()], Include::ALL)
            .await
            .unwrap();
        assert_eq!(records[0].metadata, Some(EmbeddingMetadata::new("/new.png")));
        assert_eq!(records[0].vector.as_deref(), Some(&[0.25f32, 0.75][..]));
        assert!(store
            .update_metadata("nope", &EmbeddingMetadata::new("/x.png"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn fetches_more_ids_than_one_batch() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let ids: Vec<String> = (0..(ID_BATCH + 20)).map(|i| format!("h{:04}", i)).collect();
        for (i, id) in ids.iter().enumerate() {
            store
                .upsert(&EmbeddingEntry::new(
                    id.as_str(),
                    vec![i as f32],
                    format!("/{}.png", i),
                    "test-model",
                ))
                .await
                .unwrap();
        }

        let records = store.get_by_ids(&ids, Include::METADATAS).await.unwrap();
        assert_eq!(records.len(), ids.len());
        assert!(records.iter().zip(&ids).all(|(r, id)| &r.id == id));
    }
}
