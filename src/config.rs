use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service (e.g. an Ollama instance).
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_pack_max_tokens")]
    pub pack_max_tokens: i64,
    /// Fixed candidate pool size for context packing.
    #[serde(default = "default_pack_pool_size")]
    pub pack_pool_size: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            semantic_weight: default_semantic_weight(),
            pack_max_tokens: default_pack_max_tokens(),
            pack_pool_size: default_pack_pool_size(),
        }
    }
}

fn default_limit() -> i64 {
    20
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_pack_max_tokens() -> i64 {
    8000
}
fn default_pack_pool_size() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Concurrent jobs per worker pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: i64,
    /// Idle sleep between claim polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_max_attempts() -> i64 {
    5
}
fn default_backoff_base_secs() -> i64 {
    2
}
fn default_poll_interval_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    format!("quarry-bot/{} (knowledge-base ingest)", env!("CARGO_PKG_VERSION"))
}
fn default_fetch_timeout_secs() -> u64 {
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
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if !(0.0..=1.0).contains(&config.search.semantic_weight) {
        anyhow::bail!("search.semantic_weight must be in [0.0, 1.0]");
    }
    if !(1..=100).contains(&config.search.default_limit) {
        anyhow::bail!("search.default_limit must be in [1, 100]");
    }
    if config.queue.concurrency == 0 {
        anyhow::bail!("queue.concurrency must be > 0");
    }
    if config.queue.max_attempts < 1 {
        anyhow::bail!("queue.max_attempts must be >= 1");
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
        let config = parse("[db]\npath = \"/tmp/kb.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 512);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.dims, 768);
        assert!((config.search.semantic_weight - 0.7).abs() < 1e-9);
        assert_eq!(config.search.pack_max_tokens, 8000);
        assert_eq!(config.search.pack_pool_size, 50);
        assert_eq!(config.queue.max_attempts, 5);
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_rejects_out_of_range_semantic_weight() {
        let err = parse("[db]\npath = \"x\"\n[search]\nsemantic_weight = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("semantic_weight"));
    }

    #[test]
    fn test_overrides_applied() {
        let config = parse(
            "[db]\npath = \"x\"\n[embedding]\nbase_url = \"http://embed:9000\"\nmodel = \"mxbai\"\ndims = 1024\n",
        )
        .unwrap();
        assert_eq!(config.embedding.base_url, "http://embed:9000");
        assert_eq!(config.embedding.model, "mxbai");
        assert_eq!(config.embedding.dims, 1024);
    }
}
