//! Agent run scheduler.
//!
//! A run executes a finite plan of steps against a target (a roadmap node
//! or an ad-hoc query). Step kinds are a closed sum matched exhaustively at
//! execution time:
//! - **retrieval** — assembles a budgeted context for the target;
//! - **reasoning** — hands the most recent retrieved context to the
//!   generation capability and records its output;
//! - **tool call** — triggers an external workflow by id with a payload.
//!
//! Each completed step is persisted, together with the shrunken remaining
//! plan, before the next step is considered, so a crash mid-run leaves a
//! consistent, replayable transcript. Steps within one run are strictly
//! sequential; [`Scheduler::run_next_step`] is the single-step engine and
//! [`Scheduler::execute`] just loops it to a terminal state.
//!
//! Cancellation is cooperative. The flag is re-read after every step, so an
//! in-flight capability call finishes and its result is recorded, then the
//! run ends CANCELLED instead of scheduling the next step.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{with_timeout, Capabilities};
use crate::error::{EngineError, Result};
use crate::models::{AgentRun, RunStatus, RunTarget, StepKind, StepRecord};
use crate::retrieval::Retriever;
use crate::store::Store;

/// One planned, not-yet-executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    Retrieval,
    Reasoning,
    ToolCall {
        workflow_id: String,
        payload: serde_json::Value,
    },
}

impl StepSpec {
    fn record_kind(&self) -> StepKind {
        match self {
            StepSpec::Retrieval => StepKind::Retrieval,
            StepSpec::Reasoning => StepKind::Reasoning,
            StepSpec::ToolCall { .. } => StepKind::ToolCall,
        }
    }
}

/// Default plan for a freshly started run.
pub fn default_plan() -> Vec<StepSpec> {
    vec![StepSpec::Retrieval, StepSpec::Reasoning]
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    retriever: Arc<Retriever>,
    capabilities: Capabilities,
    top_k: usize,
    budget_capacity: u32,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        retriever: Arc<Retriever>,
        capabilities: Capabilities,
        top_k: usize,
        budget_capacity: u32,
    ) -> Self {
        Self {
            store,
            retriever,
            capabilities,
            top_k,
            budget_capacity,
        }
    }

    /// Create a QUEUED run with the default retrieval-then-reasoning plan.
    pub async fn start(&self, project_id: &str, target: RunTarget) -> Result<String> {
        self.start_with_plan(project_id, target, default_plan()).await
    }

    pub async fn start_with_plan(
        &self,
        project_id: &str,
        target: RunTarget,
        plan: Vec<StepSpec>,
    ) -> Result<String> {
        if plan.is_empty() {
            return Err(EngineError::Validation("run plan is empty".into()));
        }
        if let RunTarget::Node(node_id) = &target {
            // Fail fast instead of on the first step.
            self.store.get_node(node_id).await?;
        }

        let now = Utc::now().timestamp();
        let run = AgentRun {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            target,
            status: RunStatus::Queued,
            steps: Vec::new(),
            plan,
            cancel_requested: false,
            error_kind: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_run(&run).await?;
        tracing::info!(run_id = %run.id, project_id, "agent run queued");
        Ok(run.id)
    }

    pub async fn get(&self, run_id: &str) -> Result<AgentRun> {
        self.store.get_run(run_id).await
    }

    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        self.store.request_run_cancel(run_id).await
    }

    /// Execute at most one step and persist the outcome.
    ///
    /// Returns the run after the transition. Terminal runs are returned
    /// unchanged; a requested cancellation wins over scheduling the next
    /// step.
    pub async fn run_next_step(&self, run_id: &str) -> Result<AgentRun> {
        let mut run = self.store.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        if run.cancel_requested {
            return self.finish(run, RunStatus::Cancelled, None).await;
        }

        let Some(spec) = run.plan.first().cloned() else {
            return self.finish(run, RunStatus::Succeeded, None).await;
        };

        if run.status == RunStatus::Queued {
            run.status = RunStatus::Running;
            run.updated_at = Utc::now().timestamp();
            self.store.update_run(&run).await?;
        }

        let seq = run.steps.len() as u32 + 1;
        match self.execute_step(&run, &spec).await {
            Ok((input, output)) => {
                run.steps.push(StepRecord {
                    seq,
                    kind: spec.record_kind(),
                    input,
                    output,
                    at: Utc::now().timestamp(),
                });
                run.plan.remove(0);
                run.updated_at = Utc::now().timestamp();
                self.store.update_run(&run).await?;
                tracing::debug!(run_id = %run.id, seq, "step recorded");

                // The flag may have been set while the step was in flight;
                // the step's result stays recorded either way.
                let fresh = self.store.get_run(run_id).await?;
                if fresh.cancel_requested {
                    return self.finish(fresh, RunStatus::Cancelled, None).await;
                }
                if fresh.plan.is_empty() {
                    return self.finish(fresh, RunStatus::Succeeded, None).await;
                }
                Ok(fresh)
            }
            Err(err) => {
                tracing::warn!(run_id = %run.id, seq, kind = err.kind(), error = %err, "step failed");
                self.finish(run, RunStatus::Failed, Some(err)).await
            }
        }
    }

    /// Loop [`Self::run_next_step`] until the run is terminal.
    pub async fn execute(&self, run_id: &str) -> Result<AgentRun> {
        loop {
            let run = self.run_next_step(run_id).await?;
            if run.status.is_terminal() {
                tracing::info!(
                    run_id = %run.id,
                    status = run.status.as_str(),
                    steps = run.steps.len(),
                    "agent run finished"
                );
                return Ok(run);
            }
        }
    }

    /// Execute in a background task.
    pub fn spawn(self: &Arc<Self>, run_id: String) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = scheduler.execute(&run_id).await {
                tracing::error!(run_id = %run_id, error = %err, "run worker error");
            }
        });
    }

    /// The step's (input, output) pair for the transcript.
    async fn execute_step(&self, run: &AgentRun, spec: &StepSpec) -> Result<(String, String)> {
        let timeout = self.capabilities.timeout_secs;
        match spec {
            StepSpec::Retrieval => {
                let query = self.target_query(run).await?;
                let budget = self
                    .retriever
                    .assemble_for_query(&query, &run.project_id, self.top_k, self.budget_capacity)
                    .await?;
                tracing::debug!(
                    run_id = %run.id,
                    consumed = budget.consumed,
                    capacity = budget.capacity,
                    items = budget.items.len(),
                    "context assembled"
                );
                Ok((query, budget.render()))
            }
            StepSpec::Reasoning => {
                let query = self.target_query(run).await?;
                let context = run
                    .steps
                    .iter()
                    .rev()
                    .find(|s| s.kind == StepKind::Retrieval)
                    .map(|s| s.output.clone())
                    .unwrap_or_default();
                let output = with_timeout(
                    "generate",
                    timeout,
                    self.capabilities.generator.generate(&context, &query),
                )
                .await?;
                Ok((query, output))
            }
            StepSpec::ToolCall {
                workflow_id,
                payload,
            } => {
                let response = with_timeout(
                    "trigger_workflow",
                    timeout,
                    self.capabilities.workflow.trigger(workflow_id, payload),
                )
                .await?;
                Ok((workflow_id.clone(), response.to_string()))
            }
        }
    }

    /// The query text a step works with: the node title for node targets,
    /// the query itself otherwise.
    async fn target_query(&self, run: &AgentRun) -> Result<String> {
        match &run.target {
            RunTarget::Node(node_id) => Ok(self.store.get_node(node_id).await?.title),
            RunTarget::Query(query) => Ok(query.clone()),
        }
    }

    async fn finish(
        &self,
        mut run: AgentRun,
        status: RunStatus,
        err: Option<EngineError>,
    ) -> Result<AgentRun> {
        run.status = status;
        if let Some(err) = err {
            run.error_kind = Some(err.kind().to_string());
            run.error_detail = Some(err.to_string());
        } else if status == RunStatus::Cancelled {
            run.error_kind = Some("cancelled".to_string());
            run.error_detail = Some("cancellation requested".to_string());
        }
        run.updated_at = Utc::now().timestamp();
        self.store.update_run(&run).await?;
        Ok(run)
    }
}
