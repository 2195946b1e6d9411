//! SQLite [`Store`] backend.
//!
//! Plain sqlx queries over the migrated schema. JSON columns carry the
//! nested collections (decision options, run steps, run plan); everything
//! else maps to scalar columns. The one-RUNNING-job-per-artifact invariant
//! is a single conditional UPDATE, so concurrent workers cannot both win.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{EngineError, Result};
use crate::models::{
    AgentRun, Artifact, Chunk, IngestJob, JobStatus, NodeKind, NodeStatus, RoadmapEdge,
    RoadmapNode, RunStatus, SourceKind,
};

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T>(label: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(raw).ok_or_else(|| EngineError::Store(format!("invalid {} value: {}", label, raw)))
}

fn artifact_from_row(row: &SqliteRow) -> Result<Artifact> {
    let kind: String = row.get("kind");
    Ok(Artifact {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: parse_enum("source kind", &kind, SourceKind::parse)?,
        name: row.get("name"),
        bytes: row.get("bytes"),
        created_at: row.get("created_at"),
        ingested_at: row.get("ingested_at"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let start: i64 = row.get("start_char");
    let end: i64 = row.get("end_char");
    Chunk {
        id: row.get("id"),
        artifact_id: row.get("artifact_id"),
        project_id: row.get("project_id"),
        start: start as usize,
        end: end as usize,
        text: row.get("text"),
        hash: row.get("hash"),
    }
}

fn job_from_row(row: &SqliteRow) -> Result<IngestJob> {
    let status: String = row.get("status");
    let attempts: i64 = row.get("attempts");
    let cancel: i64 = row.get("cancel_requested");
    Ok(IngestJob {
        id: row.get("id"),
        artifact_id: row.get("artifact_id"),
        project_id: row.get("project_id"),
        status: parse_enum("job status", &status, JobStatus::parse)?,
        attempts: attempts as u32,
        error_kind: row.get("error_kind"),
        error_detail: row.get("error_detail"),
        cancel_requested: cancel != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn node_from_row(row: &SqliteRow) -> Result<RoadmapNode> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let options_json: String = row.get("options_json");
    Ok(RoadmapNode {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: parse_enum("node kind", &kind, NodeKind::parse)?,
        title: row.get("title"),
        status: parse_enum("node status", &status, NodeStatus::parse)?,
        options: serde_json::from_str(&options_json)?,
        chosen_option: row.get("chosen_option"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn run_from_row(row: &SqliteRow) -> Result<AgentRun> {
    let status: String = row.get("status");
    let target_json: String = row.get("target_json");
    let steps_json: String = row.get("steps_json");
    let plan_json: String = row.get("plan_json");
    let cancel: i64 = row.get("cancel_requested");
    Ok(AgentRun {
        id: row.get("id"),
        project_id: row.get("project_id"),
        target: serde_json::from_str(&target_json)?,
        status: parse_enum("run status", &status, RunStatus::parse)?,
        steps: serde_json::from_str(&steps_json)?,
        plan: serde_json::from_str(&plan_json)?,
        cancel_requested: cancel != 0,
        error_kind: row.get("error_kind"),
        error_detail: row.get("error_detail"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifacts (id, project_id, kind, name, bytes, created_at, ingested_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&artifact.id)
        .bind(&artifact.project_id)
        .bind(artifact.kind.as_str())
        .bind(&artifact.name)
        .bind(&artifact.bytes)
        .bind(artifact.created_at)
        .bind(artifact.ingested_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_artifact(&self, id: &str) -> Result<Artifact> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: "artifact",
                id: id.to_string(),
            })?;
        artifact_from_row(&row)
    }

    async fn mark_artifact_ingested(&self, id: &str, at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE artifacts SET ingested_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                what: "artifact",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, artifact_id, project_id, start_char, end_char, text, hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET text = excluded.text, hash = excluded.hash",
            )
            .bind(&chunk.id)
            .bind(&chunk.artifact_id)
            .bind(&chunk.project_id)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Chunk> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: "chunk",
                id: id.to_string(),
            })?;
        Ok(chunk_from_row(&row))
    }

    async fn chunks_for_artifact(&self, artifact_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE artifact_id = ? ORDER BY start_char")
            .bind(artifact_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn chunk_hashes_for_artifact(&self, artifact_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT hash FROM chunks WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("hash")).collect())
    }

    async fn insert_job(&self, job: &IngestJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, artifact_id, project_id, status, attempts, error_kind,
                               error_detail, cancel_requested, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.artifact_id)
        .bind(&job.project_id)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.error_kind)
        .bind(&job.error_detail)
        .bind(job.cancel_requested as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<IngestJob> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: "job",
                id: id.to_string(),
            })?;
        job_from_row(&row)
    }

    async fn update_job(&self, job: &IngestJob) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, attempts = ?, error_kind = ?, error_detail = ?,
                             cancel_requested = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.error_kind)
        .bind(&job.error_detail)
        .bind(job.cancel_requested as i64)
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                what: "job",
                id: job.id.clone(),
            });
        }
        Ok(())
    }

    async fn try_start_job(&self, id: &str) -> Result<IngestJob> {
        // Single conditional UPDATE; the WHERE clause is the whole
        // concurrency story for the one-running-job invariant.
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
             WHERE id = ? AND status = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM jobs other
                   WHERE other.artifact_id = jobs.artifact_id AND other.status = 'running'
               )",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish missing from conflicting for the caller.
            let job = self.get_job(id).await?;
            return Err(EngineError::JobConflict(format!(
                "job {} not startable (status {}, artifact {})",
                id,
                job.status.as_str(),
                job.artifact_id
            )));
        }
        self.get_job(id).await
    }

    async fn request_job_cancel(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_node(&self, node: &RoadmapNode) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (id, project_id, kind, title, status, options_json,
                                chosen_option, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.project_id)
        .bind(node.kind.as_str())
        .bind(&node.title)
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.options)?)
        .bind(&node.chosen_option)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<RoadmapNode> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: "node",
                id: id.to_string(),
            })?;
        node_from_row(&row)
    }

    async fn update_node(&self, node: &RoadmapNode) -> Result<()> {
        let result = sqlx::query(
            "UPDATE nodes SET status = ?, options_json = ?, chosen_option = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.options)?)
        .bind(&node.chosen_option)
        .bind(node.updated_at)
        .bind(&node.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                what: "node",
                id: node.id.clone(),
            });
        }
        Ok(())
    }

    async fn nodes_for_project(&self, project_id: &str) -> Result<Vec<RoadmapNode>> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE project_id = ? ORDER BY created_at, id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn insert_edge(&self, edge: &RoadmapEdge) -> Result<()> {
        sqlx::query(
            "INSERT INTO edges (project_id, from_node, to_node) VALUES (?, ?, ?)
             ON CONFLICT(from_node, to_node) DO NOTHING",
        )
        .bind(&edge.project_id)
        .bind(&edge.from_node)
        .bind(&edge.to_node)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn edges_for_project(&self, project_id: &str) -> Result<Vec<RoadmapEdge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| RoadmapEdge {
                project_id: row.get("project_id"),
                from_node: row.get("from_node"),
                to_node: row.get("to_node"),
            })
            .collect())
    }

    async fn insert_run(&self, run: &AgentRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, project_id, target_json, status, steps_json, plan_json,
                               cancel_requested, error_kind, error_detail, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(serde_json::to_string(&run.target)?)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.steps)?)
        .bind(serde_json::to_string(&run.plan)?)
        .bind(run.cancel_requested as i64)
        .bind(&run.error_kind)
        .bind(&run.error_detail)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<AgentRun> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: "run",
                id: id.to_string(),
            })?;
        run_from_row(&row)
    }

    async fn update_run(&self, run: &AgentRun) -> Result<()> {
        // cancel_requested is deliberately not written here. The flag is
        // owned by request_run_cancel; a snapshot taken before a step ran
        // must not clear a flag set while that step was in flight.
        let result = sqlx::query(
            "UPDATE runs SET status = ?, steps_json = ?, plan_json = ?,
                             error_kind = ?, error_detail = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.steps)?)
        .bind(serde_json::to_string(&run.plan)?)
        .bind(&run.error_kind)
        .bind(&run.error_detail)
        .bind(run.updated_at)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                what: "run",
                id: run.id.clone(),
            });
        }
        Ok(())
    }

    async fn request_run_cancel(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET cancel_requested = 1, updated_at = ?
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
