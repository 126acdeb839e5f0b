//! Retrieval pipeline: embed, rank, threshold.
//!
//! # Algorithm
//!
//! 1. Return nothing for a non-positive `limit`, without embedding or locking.
//! 2. Embed the query text. Provider failures propagate as
//!    [`CoreError::Embedding`](crate::error::CoreError::Embedding).
//! 3. Take the read lock and rank with `top_k = limit`.
//! 4. Drop hits with `score < score_threshold`. Filtering happens after
//!    truncation, so a below-threshold hit still uses up one of the `limit`
//!    slots; callers who need more survivors ask for a larger `limit`.
//! 5. Project survivors into owned [`RetrievalResult`]s and release the lock.
//!
//! The threshold is not clamped to `[-1, 1]`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, NewRecord, RetrievalResult};

/// An index shared between concurrent requests: readers search in parallel,
/// insert and clear are exclusive.
pub type SharedIndex = Arc<RwLock<Box<dyn VectorIndex>>>;

/// Query and indexing front-end over one collection.
#[derive(Clone)]
pub struct RetrievalPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: SharedIndex,
}

impl RetrievalPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: SharedIndex) -> Self {
        Self { embedder, index }
    }

    /// Rank indexed passages against `query`.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;

        let index = self.index.read();
        let results: Vec<RetrievalResult> = index
            .search(&query_vec, limit as usize)?
            .iter()
            .filter(|hit| hit.score >= score_threshold)
            .map(|hit| hit.to_result())
            .collect();

        tracing::debug!(
            limit,
            score_threshold,
            returned = results.len(),
            "retrieval search complete"
        );

        Ok(results)
    }

    /// Embed and insert chunks as one atomic batch.
    ///
    /// Embedding happens before the write lock is taken. If any embedding
    /// fails, nothing is inserted.
    pub async fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.embed_chunks(chunks).await?;
        let ids = self.index.write().insert(records)?;
        tracing::debug!(inserted = ids.len(), "chunks indexed");
        Ok(ids)
    }

    /// Embed `chunks` and swap them in for the current contents.
    ///
    /// Readers see either the old records or the new ones, never a mix. A
    /// failed embedding or insert leaves the old records in place.
    pub async fn replace_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<String>> {
        let records = self.embed_chunks(chunks).await?;
        let ids = self.index.write().replace(records)?;
        tracing::debug!(inserted = ids.len(), "collection contents replaced");
        Ok(ids)
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<NewRecord>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewRecord::new(chunk.text, vector, chunk.metadata))
            .collect())
    }

    /// Drop every record in the underlying index.
    pub fn clear(&self) {
        self.index.write().clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
