//! Ingestion pipeline.
//!
//! Turns a submitted artifact into deduplicated, vector-indexed chunks and
//! tracks the job lifecycle: PENDING → RUNNING → SUCCEEDED / FAILED /
//! CANCELLED.
//!
//! Stages of one job:
//!
//! ```text
//! load artifact → extract text → chunk → dedup by hash → embed → commit
//! ```
//!
//! The commit is all-or-nothing: chunks and vectors are staged in memory
//! and written in one batch only after every stage succeeded, so a FAILED
//! job leaves no partial state and is safe to resubmit. Cancellation is
//! cooperative; the flag is checked between stages and an in-flight
//! capability call is allowed to finish.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::capability::{with_timeout, Capabilities};
use crate::config::ChunkingConfig;
use crate::chunker::chunk_text;
use crate::error::{EngineError, Result};
use crate::index::{VectorIndex, VectorRecord};
use crate::models::{Artifact, Chunk, IngestJob, JobStatus};
use crate::store::Store;

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    index: Arc<dyn VectorIndex>,
    capabilities: Capabilities,
    chunking: ChunkingConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        index: Arc<dyn VectorIndex>,
        capabilities: Capabilities,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            index,
            capabilities,
            chunking,
        }
    }

    /// Store the artifact (first submission only) and enqueue a PENDING
    /// ingest job for it. Returns the job ID.
    pub async fn submit(&self, artifact: Artifact) -> Result<String> {
        if artifact.bytes.is_empty() {
            return Err(EngineError::Extraction(format!(
                "artifact {} is empty",
                artifact.id
            )));
        }

        // Resubmission of a known artifact reuses the stored record.
        let artifact_id = artifact.id.clone();
        let project_id = artifact.project_id.clone();
        if self.store.get_artifact(&artifact_id).await.is_err() {
            self.store.insert_artifact(&artifact).await?;
        }

        let now = Utc::now().timestamp();
        let job = IngestJob {
            id: Uuid::new_v4().to_string(),
            artifact_id,
            project_id,
            status: JobStatus::Pending,
            attempts: 0,
            error_kind: None,
            error_detail: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_job(&job).await?;
        tracing::info!(job_id = %job.id, artifact_id = %job.artifact_id, "ingest job submitted");
        Ok(job.id)
    }

    pub async fn status(&self, job_id: &str) -> Result<IngestJob> {
        self.store.get_job(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        self.store.request_job_cancel(job_id).await
    }

    /// Drive one job to a terminal state. Capability failures become the
    /// job's terminal FAILED state rather than propagating; only store
    /// errors while recording that state bubble up.
    pub async fn process(&self, job_id: &str) -> Result<IngestJob> {
        let job = self.store.try_start_job(job_id).await?;

        match self.run_stages(&job).await {
            Ok(new_chunks) => {
                self.store
                    .mark_artifact_ingested(&job.artifact_id, Utc::now().timestamp())
                    .await?;
                tracing::info!(
                    job_id = %job.id,
                    artifact_id = %job.artifact_id,
                    new_chunks,
                    "ingest job succeeded"
                );
                self.finish(job, JobStatus::Succeeded, None).await
            }
            Err(EngineError::Cancelled(detail)) => {
                tracing::info!(job_id = %job.id, "ingest job cancelled");
                self.finish(
                    job,
                    JobStatus::Cancelled,
                    Some(EngineError::Cancelled(detail)),
                )
                .await
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, kind = err.kind(), error = %err, "ingest job failed");
                self.finish(job, JobStatus::Failed, Some(err)).await
            }
        }
    }

    /// Process in a background task.
    pub fn spawn(self: &Arc<Self>, job_id: String) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = pipeline.process(&job_id).await {
                tracing::error!(job_id = %job_id, error = %err, "ingest worker error");
            }
        });
    }

    /// Returns the number of newly committed chunks.
    async fn run_stages(&self, job: &IngestJob) -> Result<usize> {
        let artifact = self.store.get_artifact(&job.artifact_id).await?;
        let timeout = self.capabilities.timeout_secs;

        self.check_cancel(&job.id).await?;
        let text = with_timeout(
            "extract_text",
            timeout,
            self.capabilities.extractor.extract(&artifact),
        )
        .await?;

        let chunks = chunk_text(
            &artifact.id,
            &artifact.project_id,
            &text,
            self.chunking.chunk_size,
            self.chunking.overlap,
        );

        // Idempotent re-ingestion: keep only chunks whose content hash is
        // not already stored for this artifact.
        let existing = self.store.chunk_hashes_for_artifact(&artifact.id).await?;
        let new_chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !existing.contains(&c.hash))
            .collect();
        if new_chunks.is_empty() {
            return Ok(0);
        }

        self.check_cancel(&job.id).await?;
        let texts: Vec<String> = new_chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = with_timeout(
            "embed",
            timeout,
            self.capabilities.embedder.embed(&texts),
        )
        .await?;
        if vectors.len() != new_chunks.len() {
            return Err(EngineError::Embedding(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                new_chunks.len()
            )));
        }

        self.check_cancel(&job.id).await?;
        self.commit(&artifact, &new_chunks, vectors).await?;
        Ok(new_chunks.len())
    }

    /// Batch-write vectors and chunk records. If the chunk write fails the
    /// just-upserted vectors are removed again, so index and store never
    /// disagree past a terminal job state.
    async fn commit(
        &self,
        artifact: &Artifact,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                chunk_id: chunk.id.clone(),
                artifact_id: artifact.id.clone(),
                project_id: artifact.project_id.clone(),
                vector,
            })
            .collect();

        with_timeout(
            "index_upsert",
            self.capabilities.timeout_secs,
            self.index.upsert(records),
        )
        .await?;

        if let Err(store_err) = self.store.insert_chunks(chunks).await {
            let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
            if let Err(index_err) = self.index.delete_chunks(&ids).await {
                tracing::error!(
                    artifact_id = %artifact.id,
                    error = %index_err,
                    "failed to roll back index after store error"
                );
            }
            return Err(store_err);
        }
        Ok(())
    }

    async fn check_cancel(&self, job_id: &str) -> Result<()> {
        let job = self.store.get_job(job_id).await?;
        if job.cancel_requested {
            return Err(EngineError::Cancelled(format!(
                "job {} cancelled between stages",
                job_id
            )));
        }
        Ok(())
    }

    async fn finish(
        &self,
        mut job: IngestJob,
        status: JobStatus,
        err: Option<EngineError>,
    ) -> Result<IngestJob> {
        job.status = status;
        if let Some(err) = err {
            job.error_kind = Some(err.kind().to_string());
            job.error_detail = Some(err.to_string());
        }
        job.updated_at = Utc::now().timestamp();
        self.store.update_job(&job).await?;
        Ok(job)
    }
}
