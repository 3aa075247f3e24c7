use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic, offline) or `http` (OpenAI-compatible API).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    64
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `disabled` (no graph facts) or `llm` (OpenAI-compatible chat API).
    #[serde(default = "default_extraction_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            model: None,
            endpoint: default_chat_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_extraction_provider() -> String {
    "disabled".to_string()
}
fn default_chat_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Top-k chunks taken from the vector index.
    #[serde(default = "default_k_vector")]
    pub k_vector: i64,
    /// Maximum edge traversals from a seed node in a graph query.
    #[serde(default = "default_hop_depth")]
    pub hop_depth: u32,
    /// Upper bound on graph triples returned per query.
    #[serde(default = "default_max_graph_results")]
    pub max_graph_results: usize,
    /// Total character budget for the merged context payload.
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_vector: default_k_vector(),
            hop_depth: default_hop_depth(),
            max_graph_results: default_max_graph_results(),
            context_budget_chars: default_context_budget_chars(),
        }
    }
}

fn default_k_vector() -> i64 {
    8
}
fn default_hop_depth() -> u32 {
    2
}
fn default_max_graph_results() -> usize {
    64
}
fn default_context_budget_chars() -> usize {
    6000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.target_chars");
    }

    match config.embedding.provider.as_str() {
        "hash" => {}
        "http" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'http'");
            }
        }
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be hash or http.", other),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.extraction.provider.as_str() {
        "disabled" => {}
        "llm" => {
            if config.extraction.model.is_none() {
                anyhow::bail!("extraction.model must be set when provider is 'llm'");
            }
        }
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be disabled or llm.",
            other
        ),
    }

    if config.retrieval.k_vector < 1 {
        anyhow::bail!("retrieval.k_vector must be >= 1");
    }
    if config.retrieval.hop_depth < 1 {
        anyhow::bail!("retrieval.hop_depth must be >= 1");
    }
    if config.retrieval.context_budget_chars == 0 {
        anyhow::bail!("retrieval.context_budget_chars must be > 0");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
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
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/mesh.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.target_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.extraction.provider, "disabled");
        assert_eq!(config.retrieval.k_vector, 8);
        assert_eq!(config.retrieval.hop_depth, 2);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_target() {
        let result = parse(
            "[db]\npath = \"/tmp/mesh.sqlite\"\n[chunking]\ntarget_chars = 100\noverlap_chars = 100\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_http_embedding_requires_model() {
        let result = parse("[db]\npath = \"/tmp/mesh.sqlite\"\n[embedding]\nprovider = \"http\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result =
            parse("[db]\npath = \"/tmp/mesh.sqlite\"\n[embedding]\nprovider = \"onnx\"\n");
        assert!(result.is_err());
    }
}
