use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size S, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap O between consecutive windows, in characters. Must be < S.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks fetched from the vector index per retrieval.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Context budget capacity per reasoning step, in estimated tokens.
    #[serde(default = "default_budget_capacity")]
    pub budget_capacity: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            budget_capacity: default_budget_capacity(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_budget_capacity() -> u32 {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"`, `"openai"`, or `"disabled"`.
    #[serde(default = "default_local_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_local_provider(),
            model: None,
            dims: default_dims(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_local_provider() -> String {
    "local".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"local"` or `"openai"`.
    #[serde(default = "default_local_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// OpenAI-compatible endpoint override (self-hosted runtimes).
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_local_provider(),
            model: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkflowConfig {
    /// Webhook endpoint for `trigger_workflow`. No-op trigger when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapabilityConfig {
    /// Timeout applied to every external-capability call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.budget_capacity == 0 {
        anyhow::bail!("retrieval.budget_capacity must be > 0");
    }
    if config.capabilities.timeout_secs == 0 {
        anyhow::bail!("capabilities.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or disabled.",
            other
        ),
    }
    if config.embedding.provider != "disabled" && config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    match config.generation.provider.as_str() {
        "local" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be local or openai.",
            other
        ),
    }
    if config.generation.provider == "openai" && config.generation.model.is_none() {
        anyhow::bail!("generation.model must be specified when provider is 'openai'");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/plm.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.capabilities.timeout_secs, 30);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nchunk_size = 100\noverlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"quantum\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding provider"));
    }

    #[test]
    fn openai_generation_requires_model() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n[generation]\nprovider = \"openai\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("generation.model"));
    }
}
