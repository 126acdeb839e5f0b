//! # ragline core
//!
//! The retrieval engine behind ragline: an in-memory vector index with
//! brute-force cosine ranking, the retrieval pipeline that embeds queries and
//! applies the score threshold, result deduplication, the collection
//! lifecycle bound to a session key, and context composition for the
//! downstream generation call.
//!
//! This crate contains no tokio, HTTP, or filesystem code. Embedding and
//! generation are reached through the [`EmbeddingProvider`] and
//! [`GenerationPort`] traits, implemented by the application crate.
//!
//! ## Data Flow
//!
//! ```text
//! chunks ──▶ EmbeddingProvider ──▶ VectorIndex::insert
//!
//! query ──▶ EmbeddingProvider ──▶ RetrievalPipeline::search
//!       ──▶ dedupe ──▶ ContextComposer ──▶ GenerationPort (stream)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Records, metadata, results, session keys |
//! | [`error`] | Error taxonomy |
//! | [`embedding`] | Embedding port and cosine similarity |
//! | [`index`] | `VectorIndex` trait and the brute-force implementation |
//! | [`pipeline`] | Embed → rank → threshold |
//! | [`dedup`] | Collapse verbatim-duplicate passages |
//! | [`lifecycle`] | Session-keyed collection slot |
//! | [`compose`] | Context block and streamed generation relay |

pub mod compose;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod models;
pub mod pipeline;

pub use compose::{AnswerStream, ComposedContext, ContextComposer, FragmentStream, GenerationPort};
pub use dedup::dedupe;
pub use embedding::{cosine_similarity, EmbedderFactory, EmbeddingProvider};
pub use error::{CoreError, EmbeddingError, GenerationError, Result};
pub use index::{memory::BruteForceIndex, Hit, VectorIndex};
pub use lifecycle::{Collection, CollectionInfo, CollectionManager, LifecycleState};
pub use models::{Chunk, NewRecord, RecordMetadata, RetrievalResult, SessionKey, VectorRecord};
pub use pipeline::RetrievalPipeline;
