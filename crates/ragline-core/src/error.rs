//! Error taxonomy for the retrieval core.
//!
//! Index mutations that fail leave the index in its pre-call state; every
//! variant here is raised before any record is written.

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Failure of the external embedding service.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transport or HTTP-level failure, after retries where applicable.
    #[error("embedding request failed: {0}")]
    Request(String),
    /// The provider answered, but not with a usable vector.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    /// The provider returned a vector of unexpected length.
    #[error("embedding has {found} dimensions, expected {expected}")]
    Dimensions { expected: usize, found: usize },
    /// No embedding provider is configured.
    #[error("embedding provider is disabled")]
    Disabled,
}

/// Failure of the external generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The call could not be started.
    #[error("generation request failed: {0}")]
    Request(String),
    /// The stream broke after it had started.
    #[error("generation stream failed: {0}")]
    Stream(String),
}

/// Errors raised by the index and the retrieval pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// A vector does not match the dimensionality fixed by the index.
    #[error("dimension mismatch for {subject}: index holds {expected}-dimensional vectors, got {found}")]
    DimensionMismatch {
        subject: String,
        expected: usize,
        found: usize,
    },

    /// A zero-length embedding was offered for insertion.
    #[error("record {0} has an empty embedding")]
    EmptyEmbedding(String),

    /// An upstream-supplied id is already present in the index or repeated in the batch.
    #[error("record id '{0}' already exists in the index")]
    DuplicateId(String),
}
