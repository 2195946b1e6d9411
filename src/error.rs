//! Engine error taxonomy.
//!
//! Every failure that can end an ingest job or an agent run maps to one
//! variant here. [`EngineError::kind`] yields the stable machine-readable
//! kind string persisted in job and run records; the `Display` form carries
//! the human detail. Kind strings are part of the on-disk format and must
//! not change.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("edge {from} -> {to} would close a cycle")]
    Cycle { from: String, to: String },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("workflow trigger failed: {0}")]
    Workflow(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("job conflict: {0}")]
    JobConflict(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable kind string recorded in job and run error fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Extraction(_) => "extraction",
            EngineError::UnsupportedFormat(_) => "unsupported_format",
            EngineError::Embedding(_) => "embedding",
            EngineError::Index(_) => "index",
            EngineError::Store(_) => "store",
            EngineError::Cycle { .. } => "cycle",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Generation(_) => "generation",
            EngineError::Workflow(_) => "workflow",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::JobConflict(_) => "job_conflict",
            EngineError::Validation(_) => "validation",
            EngineError::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Store(format!("serialization: {}", e))
    }
}
