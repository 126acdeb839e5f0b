//! # Ragline
//!
//! Upload a document, then query it or chat over it with
//! retrieval-augmented generation.
//!
//! The retrieval engine itself (vector index, ranking, deduplication,
//! collection lifecycle, context composition) lives in `ragline-core`. This
//! crate supplies everything around it: configuration, document extraction
//! and chunking, the HTTP providers for embeddings and completions, the
//! HTTP API, and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  upload  │──▶│ extract+chunk │──▶│  ragline-core  │◀──▶ embedding API
//! └──────────┘   └──────────────┘   │ index/compose │
//!                                   └───────┬───────┘
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │◀──▶ completion API
//!                 │(ragline) │        │ (axum)   │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`extract`] | Page-level text extraction (PDF, text, Markdown) |
//! | [`chunk`] | Sentence-aware chunking with overlap |
//! | [`ingest`] | Extract → chunk → embed → index |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`generation`] | Streaming chat-completion client |
//! | [`providers`] | Key-bound provider construction and key validation |
//! | [`server`] | HTTP API |
//! | [`search`] | `ragline search` command |
//! | [`ask`] | `ragline ask` command |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod providers;
pub mod search;
pub mod server;
pub mod telemetry;

pub use ragline_core::SessionKey;
