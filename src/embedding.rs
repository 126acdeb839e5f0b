//! HTTP embedding providers.
//!
//! Implementations of [`EmbeddingProvider`] for the services a collection
//! can embed with:
//! - **[`OpenAiEmbedder`]** calls `POST {url}/embeddings`, authenticating
//!   with the session key.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed`.
//! - **[`DisabledEmbedder`]** fails every call; used when
//!   `[embedding].provider = "disabled"`.
//!
//! Texts are sent in batches of `[embedding].batch_size`. When
//! `[embedding].dims` is set, every returned vector is checked against it.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;
use ragline_core::{EmbeddingError, EmbeddingProvider, SessionKey};

use crate::config::EmbeddingConfig;

const TRACING_TARGET: &str = "ragline::embedding";

/// Embeddings from the OpenAI API or any server that speaks its protocol.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: Option<usize>,
    batch_size: usize,
    max_retries: u32,
    key: SessionKey,
}

impl OpenAiEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig, key: SessionKey) -> Self {
        Self {
            client,
            url: config.base_url().to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            key,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        single(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = send_with_retry("OpenAI", self.max_retries, || {
                self.client
                    .post(format!("{}/embeddings", self.url))
                    .bearer_auth(self.key.expose())
                    .json(&body)
            })
            .await?;

            let vectors = parse_openai_response(&json)?;
            check_batch(&vectors, batch.len(), self.dims)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Embeddings from a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled (e.g.
/// `ollama pull nomic-embed-text`). The session key is not sent.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: Option<usize>,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            url: config.base_url().to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        single(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = send_with_retry("Ollama", self.max_retries, || {
                self.client
                    .post(format!("{}/api/embed", self.url))
                    .json(&body)
            })
            .await
            .map_err(|e| match e {
                EmbeddingError::Request(msg) => EmbeddingError::Request(format!(
                    "{} (is Ollama running at {}?)",
                    msg, self.url
                )),
                other => other,
            })?;

            let vectors = parse_ollama_response(&json)?;
            check_batch(&vectors, batch.len(), self.dims)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Placeholder provider; every call fails with [`EmbeddingError::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// POST with retry/backoff, returning the parsed JSON body.
async fn send_with_retry<F>(
    provider: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value, EmbeddingError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                target: TRACING_TARGET,
                provider,
                attempt,
                delay_secs = delay.as_secs(),
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = EmbeddingError::Request(format!(
                    "{} API error {}: {}",
                    provider, status, body_text
                ));
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(EmbeddingError::Request(format!(
                    "{} connection error: {}",
                    provider, e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EmbeddingError::Request(format!("{} embedding failed after retries", provider))
    }))
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".to_string()))?;
        indexed.push((index, to_vector(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing embeddings array".to_string()))?
        .iter()
        .map(to_vector)
        .collect()
}

fn to_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingError::InvalidResponse("embedding contains a non-number".to_string())
            })
        })
        .collect()
}

fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: Option<usize>,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(expected) = dims {
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::Dimensions {
                expected,
                found: bad.len(),
            });
        }
    }
    Ok(())
}

fn single(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, EmbeddingError> {
    match vectors.pop() {
        Some(vector) if vectors.is_empty() => Ok(vector),
        _ => Err(EmbeddingError::InvalidResponse(
            "expected exactly one embedding".to_string(),
        )),
    }
}
