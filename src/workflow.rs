//! Workflow trigger capability implementations.
//!
//! A tool-call step hands a workflow id and JSON payload to a
//! [`WorkflowTrigger`]. The built-in [`HttpTrigger`] POSTs to the configured
//! webhook endpoint; when no endpoint is configured the [`NoopTrigger`]
//! records the request and reports it as skipped, so plans with tool-call
//! steps still execute end to end in a local setup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::WorkflowTrigger;
use crate::config::WorkflowConfig;
use crate::error::{EngineError, Result};

/// Trigger that performs no external call.
pub struct NoopTrigger;

#[async_trait]
impl WorkflowTrigger for NoopTrigger {
    async fn trigger(
        &self,
        workflow_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "workflow_id": workflow_id,
            "status": "skipped",
            "payload": payload,
        }))
    }
}

/// Trigger that POSTs `{workflow_id, payload}` to a webhook endpoint and
/// returns the endpoint's JSON response.
pub struct HttpTrigger {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTrigger {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WorkflowTrigger for HttpTrigger {
    async fn trigger(
        &self,
        workflow_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "workflow_id": workflow_id,
            "payload": payload,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Workflow(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Workflow(format!(
                "webhook error {}: {}",
                status, body_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Workflow(format!("invalid webhook response: {}", e)))
    }
}

/// Create the configured [`WorkflowTrigger`].
pub fn create_trigger(config: &WorkflowConfig) -> Arc<dyn WorkflowTrigger> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(HttpTrigger::new(endpoint.clone())),
        None => Arc::new(NoopTrigger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_trigger_reports_skipped() {
        let out = NoopTrigger
            .trigger("deploy-staging", &serde_json::json!({"ref": "main"}))
            .await
            .unwrap();
        assert_eq!(out["status"], "skipped");
        assert_eq!(out["workflow_id"], "deploy-staging");
    }

    #[tokio::test]
    async fn missing_endpoint_selects_noop() {
        let config = WorkflowConfig { endpoint: None };
        let trigger = create_trigger(&config);
        let out = trigger.trigger("w", &serde_json::json!({})).await.unwrap();
        assert_eq!(out["status"], "skipped");
    }
}
