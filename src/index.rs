//! Vector index abstraction and implementations.
//!
//! The index stores one embedding per chunk and answers top-k cosine
//! similarity queries scoped to a project. Two implementations:
//! - **[`InMemoryIndex`]** — `RwLock<Vec<_>>`, used in tests and by the
//!   in-memory store setup.
//! - **[`SqliteIndex`]** — vectors as little-endian f32 BLOBs in a
//!   `chunk_vectors` table, scanned with cosine similarity computed in Rust.
//!
//! Result ordering is deterministic: score descending, then chunk ID
//! ascending as the tie-breaker.

use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{EngineError, Result};

/// One indexed chunk embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub artifact_id: String,
    pub project_id: String,
    pub vector: Vec<f32>,
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: String,
    pub artifact_id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records, keyed by chunk ID.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Top-k nearest chunks within a project, by cosine similarity.
    async fn search(&self, query: &[f32], project_id: &str, k: usize) -> Result<Vec<IndexHit>>;

    /// Remove every record belonging to an artifact.
    async fn delete_artifact(&self, artifact_id: &str) -> Result<()>;

    /// Remove specific records by chunk ID.
    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()>;
}

fn rank(mut scored: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(k);
    scored
}

// ============ In-memory index ============

#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| EngineError::Index("index lock poisoned".into()))?;
        for record in records {
            if let Some(existing) = guard.iter_mut().find(|r| r.chunk_id == record.chunk_id) {
                *existing = record;
            } else {
                guard.push(record);
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], project_id: &str, k: usize) -> Result<Vec<IndexHit>> {
        let guard = self
            .records
            .read()
            .map_err(|_| EngineError::Index("index lock poisoned".into()))?;
        let scored: Vec<IndexHit> = guard
            .iter()
            .filter(|r| r.project_id == project_id)
            .map(|r| IndexHit {
                chunk_id: r.chunk_id.clone(),
                artifact_id: r.artifact_id.clone(),
                score: cosine_similarity(query, &r.vector),
            })
            .collect();
        Ok(rank(scored, k))
    }

    async fn delete_artifact(&self, artifact_id: &str) -> Result<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| EngineError::Index("index lock poisoned".into()))?;
        guard.retain(|r| r.artifact_id != artifact_id);
        Ok(())
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| EngineError::Index("index lock poisoned".into()))?;
        guard.retain(|r| !chunk_ids.contains(&r.chunk_id));
        Ok(())
    }
}

// ============ SQLite index ============

/// Index over the `chunk_vectors` table.
///
/// Candidate vectors are scanned per project and scored in Rust. Fine for
/// the personal-corpus scale this engine targets; an ANN index would be the
/// next step if corpora grow past that.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, artifact_id, project_id, vector)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                   artifact_id = excluded.artifact_id,
                   project_id = excluded.project_id,
                   vector = excluded.vector",
            )
            .bind(&record.chunk_id)
            .bind(&record.artifact_id)
            .bind(&record.project_id)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], project_id: &str, k: usize) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            "SELECT chunk_id, artifact_id, vector FROM chunk_vectors WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                IndexHit {
                    chunk_id: row.get("chunk_id"),
                    artifact_id: row.get("artifact_id"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();
        Ok(rank(scored, k))
    }

    async fn delete_artifact(&self, artifact_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE artifact_id = ?")
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk_id in chunk_ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
