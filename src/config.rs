//! Configuration parsing and validation.
//!
//! crawl-rag is configured via a TOML file (default: `config/crawlrag.toml`).
//! The config defines the vector store path, chunking parameters, embedding
//! and LLM provider settings, graph store connection, feature flags, crawl
//! tuning, retrieval defaults, and the server bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[allow(dead_code)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    #[allow(dead_code)]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

/// Retrieval tuning (C13): defaults and bounds for `perform_rag_query` /
/// `graphrag_query` / `search_code_examples` when a tool call omits them.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_count")]
    pub default_match_count: u32,
    /// Extra rows fetched beyond `match_count + offset` so the hybrid
    /// promotion merge has enough candidates to re-sort before paginating.
    #[serde(default = "default_candidate_buffer")]
    pub candidate_buffer: usize,
    #[serde(default = "default_max_content_length")]
    pub default_max_content_length: usize,
    #[serde(default = "default_max_response_tokens")]
    pub default_max_response_tokens: usize,
    #[serde(default = "default_min_query_length")]
    pub min_query_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_match_count: default_match_count(),
            candidate_buffer: default_candidate_buffer(),
            default_max_content_length: default_max_content_length(),
            default_max_response_tokens: default_max_response_tokens(),
            min_query_length: default_min_query_length(),
        }
    }
}

fn default_match_count() -> u32 {
    5
}
fn default_candidate_buffer() -> usize {
    20
}
fn default_max_content_length() -> usize {
    1000
}
fn default_max_response_tokens() -> usize {
    20_000
}
fn default_min_query_length() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for providers that need one (currently only `ollama`).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: String::new(),
        }
    }
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureFlags {
    #[serde(default)]
    pub use_hybrid_search: bool,
    #[serde(default)]
    pub use_reranking: bool,
    #[serde(default)]
    pub use_agentic_rag: bool,
    #[serde(default)]
    pub use_contextual_embeddings: bool,
    #[serde(default)]
    pub use_graphrag: bool,
    #[serde(default)]
    pub use_knowledge_graph: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            use_hybrid_search: true,
            use_reranking: false,
            use_agentic_rag: false,
            use_contextual_embeddings: false,
            use_graphrag: false,
            use_knowledge_graph: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_api_timeout")]
    pub api_secs: u64,
    #[serde(default = "default_database_timeout")]
    pub database_secs: u64,
    #[serde(default = "default_crawler_timeout")]
    pub crawler_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            api_secs: default_api_timeout(),
            database_secs: default_database_timeout(),
            crawler_secs: default_crawler_timeout(),
        }
    }
}

fn default_api_timeout() -> u64 {
    30
}
fn default_database_timeout() -> u64 {
    10
}
fn default_crawler_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_max_depth")]
    pub default_max_depth: u32,
    #[serde(default = "default_max_concurrent")]
    pub default_max_concurrent: u32,
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_max_depth: 3,
            default_max_concurrent: 10,
            memory_threshold_mb: 4096,
        }
    }
}

fn default_max_depth() -> u32 {
    3
}
fn default_max_concurrent() -> u32 {
    10
}
fn default_memory_threshold_mb() -> u64 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    // Validate retrieval
    if config.retrieval.default_match_count < 1 {
        anyhow::bail!("retrieval.default_match_count must be >= 1");
    }
    if config.retrieval.default_max_content_length < 1 {
        anyhow::bail!("retrieval.default_max_content_length must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}
