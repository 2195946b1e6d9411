//! In-memory [`Store`] backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::models::{AgentRun, Artifact, Chunk, IngestJob, JobStatus, RoadmapEdge, RoadmapNode};

use super::Store;

#[derive(Default)]
struct Inner {
    artifacts: HashMap<String, Artifact>,
    chunks: HashMap<String, Chunk>,
    jobs: HashMap<String, IngestJob>,
    nodes: HashMap<String, RoadmapNode>,
    edges: Vec<RoadmapEdge>,
    runs: HashMap<String, AgentRun>,
}

/// `RwLock`-guarded map store. All the invariant checks live here in plain
/// Rust, which makes it the reference backend the integration tests run
/// against.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| EngineError::Store("store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| EngineError::Store("store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.write()?
            .artifacts
            .insert(artifact.id.clone(), artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, id: &str) -> Result<Artifact> {
        self.read()?
            .artifacts
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "artifact",
                id: id.to_string(),
            })
    }

    async fn mark_artifact_ingested(&self, id: &str, at: i64) -> Result<()> {
        let mut inner = self.write()?;
        let artifact = inner
            .artifacts
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound {
                what: "artifact",
                id: id.to_string(),
            })?;
        artifact.ingested_at = Some(at);
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.write()?;
        for chunk in chunks {
            inner.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Chunk> {
        self.read()?
            .chunks
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "chunk",
                id: id.to_string(),
            })
    }

    async fn chunks_for_artifact(&self, artifact_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.artifact_id == artifact_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.start);
        Ok(chunks)
    }

    async fn chunk_hashes_for_artifact(&self, artifact_id: &str) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .values()
            .filter(|c| c.artifact_id == artifact_id)
            .map(|c| c.hash.clone())
            .collect())
    }

    async fn insert_job(&self, job: &IngestJob) -> Result<()> {
        self.write()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<IngestJob> {
        self.read()?
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "job",
                id: id.to_string(),
            })
    }

    async fn update_job(&self, job: &IngestJob) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.jobs.contains_key(&job.id) {
            return Err(EngineError::NotFound {
                what: "job",
                id: job.id.clone(),
            });
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn try_start_job(&self, id: &str) -> Result<IngestJob> {
        let mut inner = self.write()?;
        let artifact_id = {
            let job = inner.jobs.get(id).ok_or_else(|| EngineError::NotFound {
                what: "job",
                id: id.to_string(),
            })?;
            if job.status != JobStatus::Pending {
                return Err(EngineError::JobConflict(format!(
                    "job {} is {}, not pending",
                    id,
                    job.status.as_str()
                )));
            }
            job.artifact_id.clone()
        };

        let running = inner
            .jobs
            .values()
            .any(|j| j.artifact_id == artifact_id && j.status == JobStatus::Running);
        if running {
            return Err(EngineError::JobConflict(format!(
                "artifact {} already has a running job",
                artifact_id
            )));
        }

        let job = inner.jobs.get_mut(id).ok_or_else(|| EngineError::NotFound {
            what: "job",
            id: id.to_string(),
        })?;
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.updated_at = chrono::Utc::now().timestamp();
        Ok(job.clone())
    }

    async fn request_job_cancel(&self, id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let job = inner.jobs.get_mut(id).ok_or_else(|| EngineError::NotFound {
            what: "job",
            id: id.to_string(),
        })?;
        if !job.status.is_terminal() {
            job.cancel_requested = true;
            job.updated_at = chrono::Utc::now().timestamp();
        }
        Ok(())
    }

    async fn insert_node(&self, node: &RoadmapNode) -> Result<()> {
        self.write()?.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<RoadmapNode> {
        self.read()?
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "node",
                id: id.to_string(),
            })
    }

    async fn update_node(&self, node: &RoadmapNode) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.nodes.contains_key(&node.id) {
            return Err(EngineError::NotFound {
                what: "node",
                id: node.id.clone(),
            });
        }
        inner.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn nodes_for_project(&self, project_id: &str) -> Result<Vec<RoadmapNode>> {
        let inner = self.read()?;
        let mut nodes: Vec<RoadmapNode> = inner
            .nodes
            .values()
            .filter(|n| n.project_id == project_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn insert_edge(&self, edge: &RoadmapEdge) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.edges.contains(edge) {
            inner.edges.push(edge.clone());
        }
        Ok(())
    }

    async fn edges_for_project(&self, project_id: &str) -> Result<Vec<RoadmapEdge>> {
        let inner = self.read()?;
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_run(&self, run: &AgentRun) -> Result<()> {
        self.write()?.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<AgentRun> {
        self.read()?
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                what: "run",
                id: id.to_string(),
            })
    }

    async fn update_run(&self, run: &AgentRun) -> Result<()> {
        let mut inner = self.write()?;
        let existing = inner.runs.get(&run.id).ok_or_else(|| EngineError::NotFound {
            what: "run",
            id: run.id.clone(),
        })?;
        // The flag is owned by request_run_cancel; a snapshot taken before
        // a step ran must not clear a flag set while it was in flight.
        let cancel_requested = existing.cancel_requested || run.cancel_requested;
        let mut updated = run.clone();
        updated.cancel_requested = cancel_requested;
        inner.runs.insert(run.id.clone(), updated);
        Ok(())
    }

    async fn request_run_cancel(&self, id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let run = inner.runs.get_mut(id).ok_or_else(|| EngineError::NotFound {
            what: "run",
            id: id.to_string(),
        })?;
        if !run.status.is_terminal() {
            run.cancel_requested = true;
            run.updated_at = chrono::Utc::now().timestamp();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunStatus, RunTarget, SourceKind};

    fn job(id: &str, artifact: &str, status: JobStatus) -> IngestJob {
        IngestJob {
            id: id.to_string(),
            artifact_id: artifact.to_string(),
            project_id: "p1".to_string(),
            status,
            attempts: 0,
            error_kind: None,
            error_detail: None,
            cancel_requested: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn try_start_job_enforces_single_running_per_artifact() {
        let store = MemoryStore::new();
        store.insert_job(&job("j1", "a1", JobStatus::Running)).await.unwrap();
        store.insert_job(&job("j2", "a1", JobStatus::Pending)).await.unwrap();
        store.insert_job(&job("j3", "a2", JobStatus::Pending)).await.unwrap();

        let err = store.try_start_job("j2").await.unwrap_err();
        assert_eq!(err.kind(), "job_conflict");

        // A different artifact is unaffected.
        let started = store.try_start_job("j3").await.unwrap();
        assert_eq!(started.status, JobStatus::Running);
        assert_eq!(started.attempts, 1);
    }

    #[tokio::test]
    async fn try_start_job_rejects_non_pending() {
        let store = MemoryStore::new();
        store.insert_job(&job("j1", "a1", JobStatus::Succeeded)).await.unwrap();
        let err = store.try_start_job("j1").await.unwrap_err();
        assert_eq!(err.kind(), "job_conflict");
    }

    #[tokio::test]
    async fn cancel_is_noop_on_terminal_jobs() {
        let store = MemoryStore::new();
        store.insert_job(&job("j1", "a1", JobStatus::Succeeded)).await.unwrap();
        store.request_job_cancel("j1").await.unwrap();
        assert!(!store.get_job("j1").await.unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn artifact_roundtrip_and_ingested_mark() {
        let store = MemoryStore::new();
        let artifact = Artifact {
            id: "a1".into(),
            project_id: "p1".into(),
            kind: SourceKind::Document,
            name: "notes.txt".into(),
            bytes: b"hello".to_vec(),
            created_at: 1,
            ingested_at: None,
        };
        store.insert_artifact(&artifact).await.unwrap();
        store.mark_artifact_ingested("a1", 42).await.unwrap();
        assert_eq!(store.get_artifact("a1").await.unwrap().ingested_at, Some(42));

        let err = store.get_artifact("missing").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn update_run_preserves_a_concurrent_cancel_request() {
        let store = MemoryStore::new();
        let mut run = AgentRun {
            id: "r1".into(),
            project_id: "p1".into(),
            target: RunTarget::Query("q".into()),
            status: RunStatus::Running,
            steps: Vec::new(),
            plan: Vec::new(),
            cancel_requested: false,
            error_kind: None,
            error_detail: None,
            created_at: 0,
            updated_at: 0,
        };
        store.insert_run(&run).await.unwrap();
        store.request_run_cancel("r1").await.unwrap();

        // A snapshot taken before the cancel must not clear the flag.
        run.updated_at = 1;
        store.update_run(&run).await.unwrap();
        assert!(store.get_run("r1").await.unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn duplicate_edges_collapse() {
        let store = MemoryStore::new();
        let edge = RoadmapEdge {
            project_id: "p1".into(),
            from_node: "x".into(),
            to_node: "z".into(),
        };
        store.insert_edge(&edge).await.unwrap();
        store.insert_edge(&edge).await.unwrap();
        assert_eq!(store.edges_for_project("p1").await.unwrap().len(), 1);
    }
}
