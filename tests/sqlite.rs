//! SQLite backend tests: migrations, store roundtrips, and the vector
//! index, all against a real database file in a temp directory.

use tempfile::TempDir;

use planloom::config::{Config, DbConfig};
use planloom::db;
use planloom::index::{InMemoryIndex, SqliteIndex, VectorIndex, VectorRecord};
use planloom::migrate;
use planloom::models::{
    AgentRun, Artifact, Chunk, IngestJob, JobStatus, RunStatus, RunTarget, SourceKind,
};
use planloom::store::{SqliteStore, Store};

async fn setup() -> (TempDir, sqlx::SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data").join("plm.sqlite"),
        },
        chunking: Default::default(),
        retrieval: Default::default(),
        embedding: Default::default(),
        generation: Default::default(),
        workflow: Default::default(),
        capabilities: Default::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    // Idempotent: a second run must not fail.
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

fn artifact(id: &str) -> Artifact {
    Artifact {
        id: id.to_string(),
        project_id: "p1".to_string(),
        kind: SourceKind::Document,
        name: "notes.txt".to_string(),
        bytes: b"some document".to_vec(),
        created_at: 10,
        ingested_at: None,
    }
}

fn job(id: &str, artifact_id: &str, status: JobStatus) -> IngestJob {
    IngestJob {
        id: id.to_string(),
        artifact_id: artifact_id.to_string(),
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
async fn artifact_and_chunk_roundtrip() {
    let (_tmp, pool) = setup().await;
    let store = SqliteStore::new(pool);

    store.insert_artifact(&artifact("a1")).await.unwrap();
    store.mark_artifact_ingested("a1", 99).await.unwrap();
    let loaded = store.get_artifact("a1").await.unwrap();
    assert_eq!(loaded.kind, SourceKind::Document);
    assert_eq!(loaded.bytes, b"some document");
    assert_eq!(loaded.ingested_at, Some(99));

    let chunks = vec![
        Chunk {
            id: "c1".into(),
            artifact_id: "a1".into(),
            project_id: "p1".into(),
            start: 0,
            end: 5,
            text: "some ".into(),
            hash: "h1".into(),
        },
        Chunk {
            id: "c2".into(),
            artifact_id: "a1".into(),
            project_id: "p1".into(),
            start: 4,
            end: 13,
            text: " document".into(),
            hash: "h2".into(),
        },
    ];
    store.insert_chunks(&chunks).await.unwrap();

    let stored = store.chunks_for_artifact("a1").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].id, "c1");
    assert_eq!(stored[1].start, 4);

    let mut hashes = store.chunk_hashes_for_artifact("a1").await.unwrap();
    hashes.sort();
    assert_eq!(hashes, vec!["h1", "h2"]);

    // Upsert by id keeps the set stable.
    store.insert_chunks(&chunks).await.unwrap();
    assert_eq!(store.chunks_for_artifact("a1").await.unwrap().len(), 2);

    let err = store.get_chunk("missing").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn conditional_job_start_is_exclusive_per_artifact() {
    let (_tmp, pool) = setup().await;
    let store = SqliteStore::new(pool);
    store.insert_artifact(&artifact("a1")).await.unwrap();
    store.insert_job(&job("j1", "a1", JobStatus::Pending)).await.unwrap();
    store.insert_job(&job("j2", "a1", JobStatus::Pending)).await.unwrap();

    let started = store.try_start_job("j1").await.unwrap();
    assert_eq!(started.status, JobStatus::Running);
    assert_eq!(started.attempts, 1);

    let err = store.try_start_job("j2").await.unwrap_err();
    assert_eq!(err.kind(), "job_conflict");

    // Finishing j1 releases the artifact.
    let mut finished = started;
    finished.status = JobStatus::Succeeded;
    store.update_job(&finished).await.unwrap();
    assert_eq!(
        store.try_start_job("j2").await.unwrap().status,
        JobStatus::Running
    );
}

#[tokio::test]
async fn run_json_columns_roundtrip() {
    let (_tmp, pool) = setup().await;
    let store = SqliteStore::new(pool);

    let run = AgentRun {
        id: "r1".into(),
        project_id: "p1".into(),
        target: RunTarget::Query("plan the rollout".into()),
        status: RunStatus::Queued,
        steps: Vec::new(),
        plan: planloom::scheduler::default_plan(),
        cancel_requested: false,
        error_kind: None,
        error_detail: None,
        created_at: 1,
        updated_at: 1,
    };
    store.insert_run(&run).await.unwrap();

    let loaded = store.get_run("r1").await.unwrap();
    assert_eq!(loaded.target, RunTarget::Query("plan the rollout".into()));
    assert_eq!(loaded.plan, planloom::scheduler::default_plan());

    store.request_run_cancel("r1").await.unwrap();
    assert!(store.get_run("r1").await.unwrap().cancel_requested);
}

#[tokio::test]
async fn update_run_preserves_a_concurrent_cancel_request() {
    let (_tmp, pool) = setup().await;
    let store = SqliteStore::new(pool);

    let mut run = AgentRun {
        id: "r2".into(),
        project_id: "p1".into(),
        target: RunTarget::Query("slow".into()),
        status: RunStatus::Running,
        steps: Vec::new(),
        plan: planloom::scheduler::default_plan(),
        cancel_requested: false,
        error_kind: None,
        error_detail: None,
        created_at: 1,
        updated_at: 1,
    };
    store.insert_run(&run).await.unwrap();

    // The flag lands while a caller still holds this older snapshot;
    // persisting the snapshot must not clear it.
    store.request_run_cancel("r2").await.unwrap();
    run.updated_at = 2;
    store.update_run(&run).await.unwrap();

    assert!(store.get_run("r2").await.unwrap().cancel_requested);
}

#[tokio::test]
async fn sqlite_index_matches_in_memory_ranking() {
    let (_tmp, pool) = setup().await;
    let sqlite = SqliteIndex::new(pool);
    let memory = InMemoryIndex::new();

    let records = vec![
        VectorRecord {
            chunk_id: "c1".into(),
            artifact_id: "a1".into(),
            project_id: "p1".into(),
            vector: vec![1.0, 0.0, 0.0],
        },
        VectorRecord {
            chunk_id: "c2".into(),
            artifact_id: "a1".into(),
            project_id: "p1".into(),
            vector: vec![0.0, 1.0, 0.0],
        },
        VectorRecord {
            chunk_id: "c3".into(),
            artifact_id: "a2".into(),
            project_id: "p1".into(),
            vector: vec![0.9, 0.1, 0.0],
        },
    ];
    sqlite.upsert(records.clone()).await.unwrap();
    memory.upsert(records).await.unwrap();

    let query = [1.0, 0.0, 0.0];
    let from_sqlite = sqlite.search(&query, "p1", 3).await.unwrap();
    let from_memory = memory.search(&query, "p1", 3).await.unwrap();
    assert_eq!(
        from_sqlite.iter().map(|h| &h.chunk_id).collect::<Vec<_>>(),
        from_memory.iter().map(|h| &h.chunk_id).collect::<Vec<_>>()
    );
    assert_eq!(from_sqlite[0].chunk_id, "c1");

    sqlite.delete_artifact("a1").await.unwrap();
    let remaining = sqlite.search(&query, "p1", 3).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].chunk_id, "c3");
}
