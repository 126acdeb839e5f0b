//! Embedding provider trait and vector similarity.
//!
//! Defines the [`EmbeddingProvider`] port that turns text into a fixed-length
//! vector, the [`EmbedderFactory`] that binds a provider to a session key, and
//! the cosine similarity used by the brute-force index.
//!
//! Concrete providers (OpenAI-compatible, Ollama) live in the `ragline` app
//! crate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EmbeddingError;
use crate::models::SessionKey;

/// Trait for embedding providers.
///
/// Calls are blocking I/O from the core's point of view and are never made
/// while an index lock is held.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the vector dimensionality, when known up front.
    fn dims(&self) -> Option<usize>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, returning vectors in input order.
    ///
    /// The default implementation embeds one text at a time.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Builds the embedding provider for a session key.
///
/// The key is usually also the credential the provider authenticates with,
/// so a new key means a new provider.
pub trait EmbedderFactory: Send + Sync {
    fn embedder_for(&self, key: &SessionKey) -> Arc<dyn EmbeddingProvider>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` when either vector has zero norm, for empty vectors, and
/// for vectors of different lengths. Never returns NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}
