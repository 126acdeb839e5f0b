//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the contract between the retrieval pipeline
//! and whatever ranks stored vectors against a query. Callers only see
//! insert, clear, and search, so the brute-force [`memory::BruteForceIndex`]
//! can be replaced by another ranking routine without touching them.
//!
//! Implementations are plain synchronous data structures; mutual exclusion
//! is provided by the `RwLock` that owns them (see
//! [`Collection`](crate::lifecycle::Collection)).

pub mod memory;

use crate::error::Result;
use crate::models::{NewRecord, RetrievalResult, VectorRecord};

/// A ranked record with the similarity score derived for one query.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub record: &'a VectorRecord,
    pub score: f32,
}

impl Hit<'_> {
    /// Project into an owned result that does not alias index storage.
    pub fn to_result(&self) -> RetrievalResult {
        RetrievalResult {
            text: self.record.text.clone(),
            score: self.score,
            metadata: self.record.metadata.clone(),
        }
    }
}

/// Storage and ranking over a single collection of embedded passages.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Append records, all or nothing |
/// | [`clear`](VectorIndex::clear) | Drop every record |
/// | [`replace`](VectorIndex::replace) | Swap all contents for a new batch |
/// | [`search`](VectorIndex::search) | Rank records against a query vector |
pub trait VectorIndex: Send + Sync {
    /// Append all records, returning their ids in input order.
    ///
    /// Fails without modifying the index if any record has an empty
    /// embedding, a dimensionality different from the index's, or an id that
    /// is already taken.
    fn insert(&mut self, records: Vec<NewRecord>) -> Result<Vec<String>>;

    /// Drop all records.
    fn clear(&mut self);

    /// Replace every stored record with `records`.
    ///
    /// Validation follows [`insert`](VectorIndex::insert) against an empty
    /// index of the same dimensionality; on failure the old contents stay.
    fn replace(&mut self, records: Vec<NewRecord>) -> Result<Vec<String>>;

    /// Rank stored records against `query`, best first, at most `top_k`.
    ///
    /// Search never mutates the index. An empty index yields an empty result.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Hit<'_>>>;

    /// Number of stored records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The dimensionality fixed for this index, if one has been established.
    fn dims(&self) -> Option<usize>;

    /// Short name of the implementation, for diagnostics.
    fn kind(&self) -> &'static str;
}
