//! Durable record store.
//!
//! Every persisted collection (artifacts, chunks, jobs, roadmap nodes and
//! edges, agent runs) goes through the [`Store`] trait. Two backends:
//! - **[`MemoryStore`]** — `RwLock`-guarded maps, used by tests.
//! - **[`SqliteStore`]** — the production backend over the sqlx pool.
//!
//! Chunk records are append-only; an artifact's chunks are replaced as a
//! set on re-ingestion but never edited in place. The single mutual
//! exclusion the store itself provides is the conditional job transition in
//! [`Store::try_start_job`], which enforces the one-RUNNING-job-per-artifact
//! invariant without a global lock.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AgentRun, Artifact, Chunk, IngestJob, RoadmapEdge, RoadmapNode};

#[async_trait]
pub trait Store: Send + Sync {
    // ---- artifacts ----

    async fn insert_artifact(&self, artifact: &Artifact) -> Result<()>;
    async fn get_artifact(&self, id: &str) -> Result<Artifact>;
    /// Record the completion time of a successful ingestion. Retrieval uses
    /// this as the freshness tie-breaker.
    async fn mark_artifact_ingested(&self, id: &str, at: i64) -> Result<()>;

    // ---- chunks ----

    /// Insert chunks, replacing any existing record with the same ID.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn get_chunk(&self, id: &str) -> Result<Chunk>;
    async fn chunks_for_artifact(&self, artifact_id: &str) -> Result<Vec<Chunk>>;
    /// Content hashes of all chunks stored for an artifact, for the
    /// skip-already-ingested check.
    async fn chunk_hashes_for_artifact(&self, artifact_id: &str) -> Result<Vec<String>>;

    // ---- ingest jobs ----

    async fn insert_job(&self, job: &IngestJob) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<IngestJob>;
    async fn update_job(&self, job: &IngestJob) -> Result<()>;
    /// Conditionally transition a PENDING job to RUNNING.
    ///
    /// Fails with `job_conflict` if the job is not PENDING or another job
    /// for the same artifact is already RUNNING. The check and the
    /// transition are a single atomic operation.
    async fn try_start_job(&self, id: &str) -> Result<IngestJob>;
    /// Set the cooperative cancellation flag. No-op on terminal jobs.
    async fn request_job_cancel(&self, id: &str) -> Result<()>;

    // ---- roadmap nodes and edges ----

    async fn insert_node(&self, node: &RoadmapNode) -> Result<()>;
    async fn get_node(&self, id: &str) -> Result<RoadmapNode>;
    async fn update_node(&self, node: &RoadmapNode) -> Result<()>;
    async fn nodes_for_project(&self, project_id: &str) -> Result<Vec<RoadmapNode>>;
    async fn insert_edge(&self, edge: &RoadmapEdge) -> Result<()>;
    async fn edges_for_project(&self, project_id: &str) -> Result<Vec<RoadmapEdge>>;

    // ---- agent runs ----

    async fn insert_run(&self, run: &AgentRun) -> Result<()>;
    async fn get_run(&self, id: &str) -> Result<AgentRun>;
    /// Persist a run snapshot. `cancel_requested` is excluded: the flag is
    /// owned by [`Store::request_run_cancel`] and a stale snapshot must not
    /// clear it.
    async fn update_run(&self, run: &AgentRun) -> Result<()>;
    /// Set the cooperative cancellation flag. No-op on terminal runs.
    async fn request_run_cancel(&self, id: &str) -> Result<()>;
}
