//! Core data models used throughout planloom.
//!
//! These types represent the artifacts, chunks, jobs, roadmap graph elements,
//! and agent runs that flow through the ingestion, retrieval, and planning
//! pipeline. All of them serialize as snake_case JSON for persistence and for
//! the CLI output.

use serde::{Deserialize, Serialize};

/// Kind of raw input an [`Artifact`] was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Document,
    ChatExport,
    Code,
    Image,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Document => "document",
            SourceKind::ChatExport => "chat_export",
            SourceKind::Code => "code",
            SourceKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(SourceKind::Document),
            "chat_export" => Some(SourceKind::ChatExport),
            "code" => Some(SourceKind::Code),
            "image" => Some(SourceKind::Image),
            _ => None,
        }
    }
}

/// Raw input submitted for ingestion. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub project_id: String,
    pub kind: SourceKind,
    /// Human-readable name (file name, export title, ...).
    pub name: String,
    /// Raw bytes as submitted. Extraction turns these into text.
    pub bytes: Vec<u8>,
    pub created_at: i64,
    /// Set when an ingest job for this artifact last succeeded.
    /// Used as the freshness tie-breaker during retrieval.
    pub ingested_at: Option<i64>,
}

/// A bounded text window derived from one artifact.
///
/// Chunk IDs are deterministic (UUIDv5 of `artifact_id:start`) so that
/// re-ingesting the same artifact reproduces the same IDs. The embedding
/// vector itself lives in the vector index, keyed by chunk ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub artifact_id: String,
    pub project_id: String,
    /// Window start, in characters from the start of the extracted text.
    pub start: usize,
    /// Window end (exclusive), in characters.
    pub end: usize,
    pub text: String,
    /// SHA-256 hex of `text`, used for cross-ingestion deduplication.
    pub hash: String,
}

/// Ingest job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Tracks one ingestion attempt. Retained after completion for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: String,
    pub artifact_id: String,
    pub project_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    /// Cooperative cancellation flag, checked between pipeline stages.
    pub cancel_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Kind of a roadmap plan unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Decision,
    Milestone,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Task => "task",
            NodeKind::Decision => "decision",
            NodeKind::Milestone => "milestone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(NodeKind::Task),
            "decision" => Some(NodeKind::Decision),
            "milestone" => Some(NodeKind::Milestone),
            _ => None,
        }
    }
}

/// Per-node roadmap state machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Active,
    Blocked,
    Done,
    Abandoned,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Active => "active",
            NodeStatus::Blocked => "blocked",
            NodeStatus::Done => "done",
            NodeStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeStatus::Pending),
            "active" => Some(NodeStatus::Active),
            "blocked" => Some(NodeStatus::Blocked),
            "done" => Some(NodeStatus::Done),
            "abandoned" => Some(NodeStatus::Abandoned),
            _ => None,
        }
    }
}

/// One selectable option on a decision node.
///
/// `branch` lists the titles of task nodes materialized as successors of
/// the decision node when this option is chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    pub label: String,
    #[serde(default)]
    pub branch: Vec<String>,
}

/// A plan unit in the roadmap DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapNode {
    pub id: String,
    pub project_id: String,
    pub kind: NodeKind,
    pub title: String,
    pub status: NodeStatus,
    /// Ordered option list; non-empty only for `kind = decision`.
    #[serde(default)]
    pub options: Vec<DecisionOption>,
    pub chosen_option: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Directed dependency edge: `to` depends on `from` being done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapEdge {
    pub project_id: String,
    pub from_node: String,
    pub to_node: String,
}

/// Agent run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// What an agent run works toward: a roadmap node or an ad-hoc query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RunTarget {
    Node(String),
    Query(String),
}

/// Kind of a single agent run step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Retrieval,
    ToolCall,
    Reasoning,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Retrieval => "retrieval",
            StepKind::ToolCall => "tool_call",
            StepKind::Reasoning => "reasoning",
        }
    }
}

/// One recorded step of an agent run. Append-only, strictly ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based, contiguous sequence number within the run.
    pub seq: u32,
    pub kind: StepKind,
    pub input: String,
    pub output: String,
    pub at: i64,
}

/// One scheduled agent execution: an auditable, ordered sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub project_id: String,
    pub target: RunTarget,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    /// Remaining planned steps, consumed front-to-back as the run executes.
    #[serde(default)]
    pub plan: Vec<crate::scheduler::StepSpec>,
    pub cancel_requested: bool,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
