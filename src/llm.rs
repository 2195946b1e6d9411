//! Text-generation capability implementations.
//!
//! Reasoning steps consume a [`Generator`]; two are built in:
//! - **[`OutlineGenerator`]** — local, deterministic. Produces a structured
//!   outline from the retrieved context without any model call, so the
//!   default setup works offline and run transcripts are reproducible.
//! - **[`OpenAIGenerator`]** — OpenAI-compatible chat completions, with an
//!   endpoint override for self-hosted runtimes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::Generator;
use crate::config::GenerationConfig;
use crate::error::{EngineError, Result};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Deterministic local generator.
///
/// Emits the prompt as a heading followed by one bullet per context line.
/// Not a language model; it exists so reasoning steps have a stable,
/// inspectable output when no provider is configured.
pub struct OutlineGenerator;

#[async_trait]
impl Generator for OutlineGenerator {
    async fn generate(&self, context: &str, prompt: &str) -> Result<String> {
        let mut out = String::new();
        out.push_str("# ");
        out.push_str(prompt.trim());
        out.push('\n');
        for line in context.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        if out.lines().count() == 1 {
            out.push_str("- (no context retrieved)\n");
        }
        Ok(out)
    }
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable. The endpoint can be
/// overridden in config for self-hosted runtimes that speak the same API.
pub struct OpenAIGenerator {
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::Config("generation.model required for OpenAI provider".to_string())
        })?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        Ok(Self {
            model,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate(&self, context: &str, prompt: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a planning assistant. Ground every answer in the provided context."
                },
                {
                    "role": "user",
                    "content": format!("Context:\n{}\n\nTask:\n{}", context, prompt)
                }
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation(format!(
                "generation API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("invalid response body: {}", e)))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::Generation("invalid response: missing choices[0].message.content".into())
            })
    }
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(OutlineGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => Err(EngineError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}
