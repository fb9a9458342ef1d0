//! Persisted document index.
//!
//! A collection lives at `<dir>/<collection>/index.sqlite` and holds
//! documents, their chunks, and an FTS5 table over chunk text. The chat path
//! only ever opens an existing collection via [`IndexHandle::load_from_disk`];
//! [`IndexHandle::create`] and [`IndexHandle::add_item`] exist to build one.
//!
//! ```text
//!   <dir>/
//!   └── factoids/
//!       └── index.sqlite   collection_meta · documents · chunks · chunks_fts
//! ```

use anyhow::Context;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::db;
use crate::migrate;
use crate::models::{Chunk, RetrievedChunk, SourceItem};
use crate::search;

/// File name of a collection's database inside its directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index for collection '{collection}' at {}", path.display())]
    NotFound { path: PathBuf, collection: String },

    #[error("index at {} holds collection '{found}', expected '{expected}'", path.display())]
    CollectionMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An open collection.
pub struct IndexHandle {
    pool: SqlitePool,
    collection: String,
    path: PathBuf,
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("collection", &self.collection)
            .field("path", &self.path)
            .finish()
    }
}

/// Location of `collection`'s database under `dir`.
pub fn collection_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(collection).join(INDEX_FILE_NAME)
}

impl IndexHandle {
    /// Open an existing collection. Never creates anything on disk.
    pub async fn load_from_disk(dir: &Path, collection: &str) -> Result<Self, IndexError> {
        let path = collection_path(dir, collection);
        if !path.is_file() {
            return Err(IndexError::NotFound {
                path,
                collection: collection.to_string(),
            });
        }

        let pool = db::connect(&path, false).await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM collection_meta WHERE key = 'collection'")
                .fetch_optional(&pool)
                .await?;

        match stored {
            Some(found) if found == collection => {}
            Some(found) => {
                pool.close().await;
                return Err(IndexError::CollectionMismatch {
                    path,
                    expected: collection.to_string(),
                    found,
                });
            }
            None => {
                pool.close().await;
                return Err(IndexError::NotFound {
                    path,
                    collection: collection.to_string(),
                });
            }
        }

        info!(collection, path = %path.display(), "index loaded");
        Ok(Self {
            pool,
            collection: collection.to_string(),
            path,
        })
    }

    /// Create (or open) a collection, running schema migrations.
    pub async fn create(dir: &Path, collection: &str) -> Result<Self, IndexError> {
        let path = collection_path(dir, collection);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let pool = db::connect(&path, true).await?;
        migrate::run_migrations(&pool, collection).await?;
        pool.close().await;

        Self::load_from_disk(dir, collection).await
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert a document and replace its chunks in one transaction. Returns
    /// the document id and the number of chunks written.
    pub async fn add_item(
        &self,
        item: &SourceItem,
        max_tokens: usize,
    ) -> Result<(String, usize), IndexError> {
        let mut tx = self.pool.begin().await?;
        let doc_id = upsert_document(&mut tx, item).await?;
        let chunks = chunk_text(&doc_id, &item.body, max_tokens);
        replace_chunks(&mut tx, &doc_id, &chunks).await?;
        tx.commit().await?;
        debug!(doc_id = %doc_id, chunks = chunks.len(), source_id = %item.source_id, "document indexed");
        Ok((doc_id, chunks.len()))
    }

    /// Keyword retrieval; see [`crate::search`].
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        candidate_k: i64,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let results = search::retrieve(&self.pool, query, top_k, candidate_k).await?;
        debug!(hits = results.len(), "retrieval complete");
        Ok(results)
    }

    pub async fn document_count(&self) -> Result<i64, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn chunk_count(&self) -> Result<i64, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn upsert_document(
    conn: &mut SqliteConnection,
    item: &SourceItem,
) -> Result<String, IndexError> {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(&mut *conn)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, title, updated_at, body, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            title = excluded.title,
            updated_at = excluded.updated_at,
            body = excluded.body,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.title)
    .bind(item.updated_at.timestamp())
    .bind(&item.body)
    .bind(&dedup_hash)
    .execute(&mut *conn)
    .await?;

    Ok(doc_id)
}

async fn replace_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<(), IndexError> {
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_dir_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = IndexHandle::load_from_disk(&tmp.path().join("nope"), "factoids")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
        assert!(!tmp.path().join("nope").exists(), "load must not create files");
    }

    #[tokio::test]
    async fn test_create_then_load() {
        let tmp = TempDir::new().unwrap();
        let created = IndexHandle::create(tmp.path(), "factoids").await.unwrap();
        assert_eq!(created.collection(), "factoids");
        assert_eq!(created.document_count().await.unwrap(), 0);
        created.close().await;

        let loaded = IndexHandle::load_from_disk(tmp.path(), "factoids")
            .await
            .unwrap();
        assert!(loaded.path().ends_with("factoids/index.sqlite"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        IndexHandle::create(tmp.path(), "factoids").await.unwrap().close().await;
        IndexHandle::create(tmp.path(), "factoids").await.unwrap().close().await;
    }

    #[tokio::test]
    async fn test_other_collection_not_found() {
        let tmp = TempDir::new().unwrap();
        IndexHandle::create(tmp.path(), "factoids").await.unwrap().close().await;
        let err = IndexHandle::load_from_disk(tmp.path(), "recipes")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_renamed_collection_dir_is_mismatch() {
        let tmp = TempDir::new().unwrap();
        IndexHandle::create(tmp.path(), "factoids").await.unwrap().close().await;
        std::fs::rename(tmp.path().join("factoids"), tmp.path().join("trivia")).unwrap();

        let err = IndexHandle::load_from_disk(tmp.path(), "trivia")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CollectionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("factoids");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INDEX_FILE_NAME), vec![0x42u8; 4096]).unwrap();

        let err = IndexHandle::load_from_disk(tmp.path(), "factoids")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Storage(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_failed_chunk_write_keeps_previous_document() {
        let tmp = TempDir::new().unwrap();
        let index = IndexHandle::create(tmp.path(), "factoids").await.unwrap();
        let mut item = SourceItem::from_text("The sky is blue.");
        index.add_item(&item, 700).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_volcano BEFORE INSERT ON chunks \
             WHEN NEW.text LIKE '%volcano%' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&index.pool)
        .await
        .unwrap();

        item.body = "The volcano is red.".to_string();
        assert!(index.add_item(&item, 700).await.is_err());

        let body: String = sqlx::query_scalar("SELECT body FROM documents WHERE source_id = ?")
            .bind(&item.source_id)
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(body, "The sky is blue.");
        let hits = index.retrieve("sky", 4, 40).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "The sky is blue.");
    }

    #[tokio::test]
    async fn test_add_and_retrieve() {
        let tmp = TempDir::new().unwrap();
        let index = IndexHandle::create(tmp.path(), "factoids").await.unwrap();
        index
            .add_item(&SourceItem::from_text("The sky is blue."), 700)
            .await
            .unwrap();
        index
            .add_item(&SourceItem::from_text("Grass is green."), 700)
            .await
            .unwrap();

        let hits = index.retrieve("What color is the sky?", 4, 40).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].text, "The sky is blue.");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_re_adding_same_text_does_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let index = IndexHandle::create(tmp.path(), "factoids").await.unwrap();
        let item = SourceItem::from_text("The sky is blue.");
        let (first, _) = index.add_item(&item, 700).await.unwrap();
        let (second, _) = index.add_item(&item, 700).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(index.document_count().await.unwrap(), 1);
        assert_eq!(index.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_without_terms_is_empty() {
        let tmp = TempDir::new().unwrap();
        let index = IndexHandle::create(tmp.path(), "factoids").await.unwrap();
        index
            .add_item(&SourceItem::from_text("The sky is blue."), 700)
            .await
            .unwrap();
        assert!(index.retrieve("???", 4, 40).await.unwrap().is_empty());
        assert!(index.retrieve("volcano", 4, 40).await.unwrap().is_empty());
    }
}
