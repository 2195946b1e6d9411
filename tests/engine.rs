//! End-to-end tests over the in-memory store and index: ingest, retrieve,
//! and drive agent runs through the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use planloom::capability::{Capabilities, Embedder, Generator};
use planloom::config::ChunkingConfig;
use planloom::embedding::HashEmbedder;
use planloom::error::{EngineError, Result};
use planloom::extract::BuiltinExtractor;
use planloom::graph::GraphEngine;
use planloom::index::{InMemoryIndex, VectorIndex, VectorRecord};
use planloom::ingest::IngestPipeline;
use planloom::llm::OutlineGenerator;
use planloom::models::{
    Artifact, Chunk, JobStatus, NodeKind, RunStatus, RunTarget, SourceKind, StepKind,
};
use planloom::retrieval::Retriever;
use planloom::scheduler::{Scheduler, StepSpec};
use planloom::store::{MemoryStore, Store};
use planloom::workflow::NoopTrigger;

const PROJECT: &str = "p1";

struct Harness {
    store: Arc<MemoryStore>,
    index: Arc<InMemoryIndex>,
    pipeline: IngestPipeline,
    retriever: Arc<Retriever>,
    scheduler: Arc<Scheduler>,
    graph: GraphEngine,
}

fn harness_with_generator(generator: Arc<dyn Generator>, timeout_secs: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(InMemoryIndex::new());
    let capabilities = Capabilities {
        extractor: Arc::new(BuiltinExtractor::new()),
        embedder: Arc::new(HashEmbedder::new(128)),
        generator,
        workflow: Arc::new(NoopTrigger),
        timeout_secs,
    };
    let pipeline = IngestPipeline::new(
        store.clone(),
        index.clone(),
        capabilities.clone(),
        ChunkingConfig {
            chunk_size: 500,
            overlap: 50,
        },
    );
    let retriever = Arc::new(Retriever::new(
        store.clone(),
        index.clone(),
        capabilities.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        retriever.clone(),
        capabilities,
        8,
        1200,
    ));
    let graph = GraphEngine::new(store.clone());
    Harness {
        store,
        index,
        pipeline,
        retriever,
        scheduler,
        graph,
    }
}

fn harness() -> Harness {
    harness_with_generator(Arc::new(OutlineGenerator), 5)
}

fn artifact(text: &str) -> Artifact {
    Artifact {
        id: Uuid::new_v4().to_string(),
        project_id: PROJECT.to_string(),
        kind: SourceKind::Document,
        name: "notes.txt".to_string(),
        bytes: text.as_bytes().to_vec(),
        created_at: Utc::now().timestamp(),
        ingested_at: None,
    }
}

async fn ingest(h: &Harness, text: &str) -> String {
    let a = artifact(text);
    let id = a.id.clone();
    let job_id = h.pipeline.submit(a).await.unwrap();
    let job = h.pipeline.process(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    id
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _context: &str, _prompt: &str) -> Result<String> {
        Err(EngineError::Generation("model unavailable".to_string()))
    }
}

struct StallingGenerator;

#[async_trait]
impl Generator for StallingGenerator {
    async fn generate(&self, _context: &str, _prompt: &str) -> Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

/// Signals when a call enters, then blocks until the test releases it.
struct GatedGenerator {
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl Generator for GatedGenerator {
    async fn generate(&self, _context: &str, prompt: &str) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(format!("# {}", prompt))
    }
}

#[tokio::test]
async fn ingest_then_retrieve_finds_the_relevant_artifact() {
    let h = harness();
    let billing = ingest(
        &h,
        "billing migration: move invoices to the new ledger schema and reconcile totals",
    )
    .await;
    ingest(
        &h,
        "office move: order desks, book the freight elevator, update the lease paperwork",
    )
    .await;

    let results = h
        .retriever
        .retrieve("invoices ledger schema reconcile totals", PROJECT, 3)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.artifact_id, billing);
}

#[tokio::test]
async fn equal_scores_prefer_the_freshest_artifact() {
    let h = harness();
    let text = "identical content in both artifacts";
    let first = ingest(&h, text).await;
    let second = ingest(&h, text).await;
    // Content hashes match but the artifacts differ, so both chunk sets
    // exist; force distinct ingestion times for the tie-break.
    h.store.mark_artifact_ingested(&first, 100).await.unwrap();
    h.store.mark_artifact_ingested(&second, 200).await.unwrap();

    let results = h.retriever.retrieve(text, PROJECT, 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.artifact_id, second);
    assert!(results[0].ingested_at > results[1].ingested_at);
}

#[tokio::test]
async fn freshness_wins_across_many_tied_candidates() {
    let h = harness();
    let text = "the same sentence indexed three times";
    let vector = HashEmbedder::new(128)
        .embed(&[text.to_string()])
        .await
        .unwrap()
        .remove(0);

    // Three exact-tie candidates; the freshest carries the chunk ID that
    // sorts last, so any pre-freshness cut by ID would evict it.
    for (artifact_id, chunk_id, ingested_at) in [("a1", "ca", 10), ("a2", "cb", 20), ("a3", "cc", 30)]
    {
        let mut a = artifact(text);
        a.id = artifact_id.to_string();
        a.ingested_at = Some(ingested_at);
        h.store.insert_artifact(&a).await.unwrap();
        h.store
            .insert_chunks(&[Chunk {
                id: chunk_id.to_string(),
                artifact_id: artifact_id.to_string(),
                project_id: PROJECT.to_string(),
                start: 0,
                end: text.chars().count(),
                text: text.to_string(),
                hash: chunk_id.to_string(),
            }])
            .await
            .unwrap();
        h.index
            .upsert(vec![VectorRecord {
                chunk_id: chunk_id.to_string(),
                artifact_id: artifact_id.to_string(),
                project_id: PROJECT.to_string(),
                vector: vector.clone(),
            }])
            .await
            .unwrap();
    }

    let results = h.retriever.retrieve(text, PROJECT, 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.id, "cc");
    assert_eq!(results[0].ingested_at, 30);
}

#[tokio::test]
async fn dangling_index_entries_are_skipped_not_fatal() {
    let h = harness();
    let real = ingest(
        &h,
        "payroll runbook: export the ledger and reconcile the totals",
    )
    .await;

    // Entries the store has no rows for: a chunk that never got written and
    // an artifact that no longer exists.
    h.index
        .upsert(vec![
            VectorRecord {
                chunk_id: "orphan-chunk".to_string(),
                artifact_id: real.clone(),
                project_id: PROJECT.to_string(),
                vector: vec![0.5; 128],
            },
            VectorRecord {
                chunk_id: "ghost-chunk".to_string(),
                artifact_id: "ghost".to_string(),
                project_id: PROJECT.to_string(),
                vector: vec![0.5; 128],
            },
        ])
        .await
        .unwrap();

    let results = h
        .retriever
        .retrieve("payroll ledger totals", PROJECT, 10)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|r| r.chunk.id != "orphan-chunk" && r.chunk.id != "ghost-chunk"));
}

#[tokio::test]
async fn reingestion_is_idempotent_end_to_end() {
    let h = harness();
    let a = artifact(&"z".repeat(3000));
    let artifact_id = a.id.clone();

    let first = h.pipeline.submit(a.clone()).await.unwrap();
    h.pipeline.process(&first).await.unwrap();
    let chunks = h.store.chunks_for_artifact(&artifact_id).await.unwrap();
    assert_eq!(chunks.len(), 7);
    let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
    assert_eq!(starts, vec![0, 450, 900, 1350, 1800, 2250, 2700]);

    let second = h.pipeline.submit(a).await.unwrap();
    let job = h.pipeline.process(&second).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(
        h.store.chunks_for_artifact(&artifact_id).await.unwrap().len(),
        7
    );
}

#[tokio::test]
async fn default_run_plan_executes_retrieval_then_reasoning() {
    let h = harness();
    ingest(&h, "beta launch checklist: freeze features, tag the release, notify early users").await;

    let run_id = h
        .scheduler
        .start(PROJECT, RunTarget::Query("plan the beta launch".into()))
        .await
        .unwrap();
    let run = h.scheduler.execute(&run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps.len(), 2);
    let seqs: Vec<u32> = run.steps.iter().map(|s| s.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(run.steps[0].kind, StepKind::Retrieval);
    assert_eq!(run.steps[1].kind, StepKind::Reasoning);
    // The outline generator echoes the prompt as a heading.
    assert!(run.steps[1].output.starts_with("# plan the beta launch"));
    assert!(run.plan.is_empty());
}

#[tokio::test]
async fn cancel_between_steps_keeps_exactly_the_completed_steps() {
    let h = harness();
    ingest(&h, "some indexed material for the retrieval step").await;

    let run_id = h
        .scheduler
        .start(PROJECT, RunTarget::Query("anything".into()))
        .await
        .unwrap();

    // Step 1 completes.
    let run = h.scheduler.run_next_step(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.steps.len(), 1);

    // Cancellation lands before step 2 is scheduled.
    h.scheduler.cancel(&run_id).await.unwrap();
    let run = h.scheduler.run_next_step(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.error_kind.as_deref(), Some("cancelled"));

    // Terminal runs accept no further steps.
    let run = h.scheduler.run_next_step(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.steps.len(), 1);
}

#[tokio::test]
async fn cancel_during_inflight_step_records_result_then_cancels() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let h = harness_with_generator(
        Arc::new(GatedGenerator {
            entered: entered.clone(),
            release: release.clone(),
        }),
        60,
    );

    let run_id = h
        .scheduler
        .start_with_plan(
            PROJECT,
            RunTarget::Query("mid-flight".into()),
            vec![StepSpec::Reasoning],
        )
        .await
        .unwrap();

    let worker = {
        let scheduler = h.scheduler.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { scheduler.execute(&run_id).await })
    };

    // Cancellation lands while the generator call is in flight; persisting
    // the finished step must not clear the flag.
    entered.notified().await;
    h.scheduler.cancel(&run_id).await.unwrap();
    release.notify_one();

    let run = worker.await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.error_kind.as_deref(), Some("cancelled"));
    // The in-flight result is still recorded.
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.steps[0].output, "# mid-flight");
}

#[tokio::test]
async fn step_failure_marks_the_run_failed_and_halts() {
    let h = harness_with_generator(Arc::new(FailingGenerator), 5);
    ingest(&h, "context material").await;

    let run_id = h
        .scheduler
        .start(PROJECT, RunTarget::Query("will fail".into()))
        .await
        .unwrap();
    let run = h.scheduler.execute(&run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_kind.as_deref(), Some("generation"));
    // The retrieval step succeeded and stays recorded.
    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.steps[0].kind, StepKind::Retrieval);
}

#[tokio::test(start_paused = true)]
async fn stalled_capability_times_out_and_fails_the_run() {
    let h = harness_with_generator(Arc::new(StallingGenerator), 1);
    ingest(&h, "context material").await;

    let run_id = h
        .scheduler
        .start_with_plan(
            PROJECT,
            RunTarget::Query("slow".into()),
            vec![StepSpec::Reasoning],
        )
        .await
        .unwrap();
    let run = h.scheduler.execute(&run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_kind.as_deref(), Some("timeout"));
    assert!(run.error_detail.unwrap().contains("generate"));
}

#[tokio::test]
async fn tool_call_step_records_the_trigger_response() {
    let h = harness();
    let run_id = h
        .scheduler
        .start_with_plan(
            PROJECT,
            RunTarget::Query("automation".into()),
            vec![StepSpec::ToolCall {
                workflow_id: "deploy-staging".into(),
                payload: serde_json::json!({"ref": "main"}),
            }],
        )
        .await
        .unwrap();
    let run = h.scheduler.execute(&run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps[0].kind, StepKind::ToolCall);
    assert_eq!(run.steps[0].input, "deploy-staging");
    assert!(run.steps[0].output.contains("skipped"));
}

#[tokio::test]
async fn node_targeted_run_uses_the_node_title_as_query() {
    let h = harness();
    ingest(&h, "payment provider comparison notes").await;
    let node = h
        .graph
        .create_node(PROJECT, NodeKind::Task, "choose payment provider", Vec::new())
        .await
        .unwrap();

    let run_id = h
        .scheduler
        .start(PROJECT, RunTarget::Node(node.id.clone()))
        .await
        .unwrap();
    let run = h.scheduler.execute(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps[0].input, "choose payment provider");

    let err = h
        .scheduler
        .start(PROJECT, RunTarget::Node("missing".into()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn resolved_decision_feeds_the_activation_sweep() {
    let h = harness();
    let decision = h
        .graph
        .create_node(
            PROJECT,
            NodeKind::Decision,
            "storage backend",
            vec![planloom::models::DecisionOption {
                label: "sqlite".into(),
                branch: vec!["write migration".into()],
            }],
        )
        .await
        .unwrap();
    let milestone = h
        .graph
        .create_node(PROJECT, NodeKind::Milestone, "storage ready", Vec::new())
        .await
        .unwrap();
    h.graph
        .create_edge(PROJECT, &decision.id, &milestone.id)
        .await
        .unwrap();

    let expansion = h.graph.resolve_decision(&decision.id, "sqlite").await.unwrap();
    assert_eq!(expansion.nodes.len(), 1);

    // Decision done: both the milestone and the new branch task are ready.
    let milestone = h.graph.get_node(&milestone.id).await.unwrap();
    assert_eq!(milestone.status.as_str(), "active");
    let task = h.graph.get_node(&expansion.nodes[0].id).await.unwrap();
    assert_eq!(task.status.as_str(), "active");
}
