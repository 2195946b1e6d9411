//! External-capability seams.
//!
//! The engine never talks to a model runtime, webhook target, or format
//! parser directly. Each consumed capability is a trait object, explicitly
//! constructed from configuration and injected into the component that needs
//! it:
//!
//! | Trait | Consumed by | Built-ins |
//! |-------|-------------|-----------|
//! | [`TextExtractor`] | ingestion | [`crate::extract::BuiltinExtractor`] |
//! | [`Embedder`] | ingestion, retrieval | local hash, OpenAI ([`crate::embedding`]) |
//! | [`Generator`] | scheduler | local outline, OpenAI ([`crate::llm`]) |
//! | [`WorkflowTrigger`] | scheduler | HTTP webhook, no-op ([`crate::workflow`]) |
//!
//! Every call site wraps the capability future in [`with_timeout`]; a timed
//! out call fails the enclosing job or step with the `timeout` error kind,
//! identical to any other capability failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::Artifact;

/// Turns a raw artifact into plain UTF-8 text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, artifact: &Artifact) -> Result<String>;
}

/// Produces fixed-dimension embedding vectors for a batch of texts.
///
/// Implementations must return one vector per input text, in input order,
/// all of length [`dims`](Embedder::dims).
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// External text-generation capability used by reasoning steps.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: &str, prompt: &str) -> Result<String>;
}

/// Triggers an external automation workflow by id with a JSON payload and
/// returns the acceptance/status response.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(
        &self,
        workflow_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Await a capability call with the configured timeout.
///
/// On timeout the error carries `what` so job/step records can name the
/// capability that stalled.
pub async fn with_timeout<T, F>(what: &str, secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            what: what.to_string(),
            secs,
        }),
    }
}

/// The full set of injected capabilities, constructed once at startup and
/// shared across ingestion, retrieval, and scheduling.
#[derive(Clone)]
pub struct Capabilities {
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub workflow: Arc<dyn WorkflowTrigger>,
    /// Timeout applied to every external call, in seconds.
    pub timeout_secs: u64,
}

impl Capabilities {
    /// Build the capability set from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            extractor: Arc::new(crate::extract::BuiltinExtractor::new()),
            embedder: crate::embedding::create_embedder(&config.embedding)?,
            generator: crate::llm::create_generator(&config.generation)?,
            workflow: crate::workflow::create_trigger(&config.workflow),
            timeout_secs: config.capabilities.timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_through_ready_results() {
        let out: Result<u32> = with_timeout("noop", 5, async { Ok(7u32) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_to_timeout_kind() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0u32)
        };
        let err = with_timeout("embed", 1, slow).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("embed"));
    }
}
