//! Provider wiring keyed by session credentials.
//!
//! [`Providers`] turns a [`SessionKey`] into the concrete embedding and
//! generation clients for it, and optionally checks that a key is accepted
//! by the provider before a collection is built for it.
//!
//! The server depends only on the traits here, so tests can stand in local
//! fakes for the remote services.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use ragline_core::{EmbedderFactory, EmbeddingProvider, GenerationPort, SessionKey};

use crate::config::{Config, EmbeddingConfig, GenerationConfig};
use crate::embedding::{DisabledEmbedder, OllamaEmbedder, OpenAiEmbedder};
use crate::generation::OpenAiGenerator;

const TRACING_TARGET: &str = "ragline::providers";

/// Builds a completion client for a key, optionally overriding the model.
pub trait GeneratorFactory: Send + Sync {
    fn generator_for(&self, key: &SessionKey, model: Option<&str>) -> Arc<dyn GenerationPort>;
}

/// Decides whether a key may be used at all.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    /// `Ok(false)` means the provider rejected the key; `Err` means the
    /// check itself could not be completed.
    async fn validate(&self, key: &SessionKey) -> Result<bool>;
}

/// HTTP-backed providers built from the `[embedding]` and `[generation]`
/// config sections.
pub struct Providers {
    embedding: EmbeddingConfig,
    generation: GenerationConfig,
    embed_client: reqwest::Client,
    chat_client: reqwest::Client,
    accepted: RwLock<HashSet<SessionKey>>,
}

impl Providers {
    pub fn new(config: &Config) -> Result<Self> {
        let embed_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()
            .context("Failed to build embedding HTTP client")?;
        let chat_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.generation.connect_timeout_secs))
            .build()
            .context("Failed to build generation HTTP client")?;

        Ok(Self {
            embedding: config.embedding.clone(),
            generation: config.generation.clone(),
            embed_client,
            chat_client,
            accepted: RwLock::new(HashSet::new()),
        })
    }
}

impl EmbedderFactory for Providers {
    fn embedder_for(&self, key: &SessionKey) -> Arc<dyn EmbeddingProvider> {
        match self.embedding.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::new(
                self.embed_client.clone(),
                &self.embedding,
                key.clone(),
            )),
            "ollama" => Arc::new(OllamaEmbedder::new(
                self.embed_client.clone(),
                &self.embedding,
            )),
            _ => Arc::new(DisabledEmbedder),
        }
    }
}

impl GeneratorFactory for Providers {
    fn generator_for(&self, key: &SessionKey, model: Option<&str>) -> Arc<dyn GenerationPort> {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.generation.model.as_str());
        Arc::new(OpenAiGenerator::new(
            self.chat_client.clone(),
            self.generation.base_url(),
            model,
            key.clone(),
        ))
    }
}

#[async_trait]
impl KeyValidator for Providers {
    /// List models with the key; success means the key is usable.
    ///
    /// Accepted keys are remembered for the life of the process.
    async fn validate(&self, key: &SessionKey) -> Result<bool> {
        if self.accepted.read().contains(key) {
            return Ok(true);
        }

        let response = self
            .embed_client
            .get(format!("{}/models", self.generation.base_url()))
            .bearer_auth(key.expose())
            .send()
            .await
            .context("Failed to reach the model listing endpoint")?;

        let status = response.status();
        if status.is_success() {
            self.accepted.write().insert(key.clone());
            tracing::info!(target: TRACING_TARGET, key = %key.fingerprint(), "api key accepted");
            return Ok(true);
        }
        if status.is_client_error() {
            tracing::warn!(
                target: TRACING_TARGET,
                key = %key.fingerprint(),
                %status,
                "api key rejected"
            );
            return Ok(false);
        }
        anyhow::bail!("model listing returned {}", status)
    }
}
