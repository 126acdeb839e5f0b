//! TOML configuration.
//!
//! Every section and field is optional; a missing file falls back to
//! [`Config::minimal`]. Values are validated once at load time by
//! [`Config::validate`], so the rest of the crate can trust them.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//! max_upload_bytes = 104857600
//! upload_dir = "data"
//!
//! [chunking]
//! chunk_size = 1024
//! chunk_overlap = 0.25
//!
//! [retrieval]
//! query_limit = 5
//! query_score_threshold = 0.7
//! chat_limit = 3
//! chat_score_threshold = 0.5
//! dedupe = true
//!
//! [embedding]
//! provider = "openai"              # openai | ollama | disabled
//! model = "text-embedding-3-small"
//!
//! [generation]
//! model = "gpt-4.1-mini"
//! allow_persona_override = false
//!
//! [auth]
//! validate_keys = false
//!
//! [ingest]
//! replace_on_upload = true
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragline_core::compose::DEFAULT_FALLBACK;

const TRACING_TARGET: &str = "ragline::config";

/// Persona used when `[generation].system_prompt` is not set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the busy banker's wingman, a helpful AI \
assistant. Give accurate, concise answers, especially to financial or mathematical questions. \
When a calculation or a step-by-step line of thought helps, break the problem into smaller steps \
and explain each one before giving the final answer. When context from uploaded documents is \
available, prefer it when answering.";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Uploaded files are kept here as received.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens (approximated as four characters each).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fraction of a chunk repeated at the start of the next one.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1024
}
fn default_chunk_overlap() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_query_limit")]
    pub query_limit: i64,
    #[serde(default = "default_query_score_threshold")]
    pub query_score_threshold: f32,
    #[serde(default = "default_chat_limit")]
    pub chat_limit: i64,
    #[serde(default = "default_chat_score_threshold")]
    pub chat_score_threshold: f32,
    /// Collapse passages with identical text before returning them.
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query_limit: default_query_limit(),
            query_score_threshold: default_query_score_threshold(),
            chat_limit: default_chat_limit(),
            chat_score_threshold: default_chat_score_threshold(),
            dedupe: true,
        }
    }
}

fn default_query_limit() -> i64 {
    5
}
fn default_query_score_threshold() -> f32 {
    0.7
}
fn default_chat_limit() -> i64 {
    3
}
fn default_chat_score_threshold() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector length. When set, responses of any other length are
    /// rejected and the index is sized up front.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured URL, or the provider's public default.
    pub fn base_url(&self) -> &str {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, "ollama") => "http://localhost:11434",
            (None, _) => "https://api.openai.com/v1",
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
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
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
    /// Connect timeout only; streamed answers are bounded by the client.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    /// Let a chat request's `developer_message` replace `system_prompt`.
    /// Off by default: the field is accepted and ignored.
    #[serde(default)]
    pub allow_persona_override: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            url: default_generation_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            system_prompt: default_system_prompt(),
            fallback_message: default_fallback_message(),
            allow_persona_override: false,
        }
    }
}

impl GenerationConfig {
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

fn default_generation_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_generation_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_fallback_message() -> String {
    DEFAULT_FALLBACK.to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Check each new key against the provider's model listing before use.
    #[serde(default)]
    pub validate_keys: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// An upload replaces the collection's contents instead of adding to them.
    #[serde(default = "default_true")]
    pub replace_on_upload: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            replace_on_upload: true,
        }
    }
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if !(0.0..1.0).contains(&self.chunking.chunk_overlap) {
            bail!("chunking.chunk_overlap must be in [0.0, 1.0)");
        }

        if self.retrieval.query_limit < 1 {
            bail!("retrieval.query_limit must be >= 1");
        }
        if self.retrieval.chat_limit < 1 {
            bail!("retrieval.chat_limit must be >= 1");
        }
        if !self.retrieval.query_score_threshold.is_finite()
            || !self.retrieval.chat_score_threshold.is_finite()
        {
            bail!("retrieval score thresholds must be finite numbers");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, or disabled.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }

        if self.generation.model.trim().is_empty() {
            bail!("generation.model must not be empty");
        }
        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be > 0");
        }

        Ok(())
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)?;
    tracing::debug!(target: TRACING_TARGET, path = %path.display(), "config loaded");
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::warn!(
        target: TRACING_TARGET,
        path = %path.display(),
        "config file not found, using built-in defaults"
    );
    Ok(Config::minimal())
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
