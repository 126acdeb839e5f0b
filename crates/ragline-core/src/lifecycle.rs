//! Session-keyed collection lifecycle.
//!
//! A [`CollectionManager`] owns a single slot holding at most one active
//! [`Collection`], bound to the [`SessionKey`] that created it:
//!
//! | From | Event | To |
//! |------|-------|----|
//! | `Uninitialized` | request with key `k` | `Active(k)`, fresh empty index |
//! | `Active(k)` | request with key `k' != k` | `Active(k')`, old index discarded |
//! | `Active(k)` | clear with key `k` | `Active(k)`, same collection emptied |
//!
//! Replacement never migrates records: keys are distinct sessions. The
//! manager is an explicit handle, shared by `Arc`, not a process global.
//!
//! Requests that acquired the old collection before a replacement keep a
//! working handle to it until they finish; their writes are simply dropped
//! with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::embedding::{EmbedderFactory, EmbeddingProvider};
use crate::index::memory::BruteForceIndex;
use crate::index::VectorIndex;
use crate::models::SessionKey;
use crate::pipeline::{RetrievalPipeline, SharedIndex};

type IndexBuilder = dyn Fn(Option<usize>) -> Box<dyn VectorIndex> + Send + Sync;

/// Observable state of the manager's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    /// Active collection, identified by its key fingerprint.
    Active(String),
}

/// Summary of a collection, for health and diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub status: &'static str,
    pub index_type: &'static str,
    pub document_count: usize,
    pub dims: Option<usize>,
    pub embedding_model: String,
    pub key_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// One session's index together with the embedder bound to its key.
pub struct Collection {
    key: SessionKey,
    index: SharedIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    created_at: DateTime<Utc>,
}

impl Collection {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// A retrieval pipeline over this collection.
    pub fn pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new(self.embedder.clone(), self.index.clone())
    }

    /// Empty the index in place.
    pub fn clear(&self) {
        self.index.write().clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self) -> CollectionInfo {
        let index = self.index.read();
        CollectionInfo {
            status: "active",
            index_type: index.kind(),
            document_count: index.len(),
            dims: index.dims(),
            embedding_model: self.embedder.model_name().to_string(),
            key_fingerprint: self.key.fingerprint(),
            created_at: self.created_at,
        }
    }
}

/// Owner of the single active collection slot.
pub struct CollectionManager {
    slot: RwLock<Option<Arc<Collection>>>,
    embedders: Arc<dyn EmbedderFactory>,
    build_index: Box<IndexBuilder>,
}

impl CollectionManager {
    /// A manager whose collections use the brute-force index.
    pub fn new(embedders: Arc<dyn EmbedderFactory>) -> Self {
        Self::with_index_builder(embedders, |dims| match dims {
            Some(d) => Box::new(BruteForceIndex::with_dims(d)),
            None => Box::new(BruteForceIndex::new()),
        })
    }

    /// A manager with a custom ranking backend.
    ///
    /// `build` receives the embedder's declared dimensionality, if any.
    pub fn with_index_builder<F>(embedders: Arc<dyn EmbedderFactory>, build: F) -> Self
    where
        F: Fn(Option<usize>) -> Box<dyn VectorIndex> + Send + Sync + 'static,
    {
        Self {
            slot: RwLock::new(None),
            embedders,
            build_index: Box::new(build),
        }
    }

    /// Return the collection bound to `key`, creating or replacing as needed.
    pub fn acquire(&self, key: &SessionKey) -> Arc<Collection> {
        if let Some(active) = self.slot.read().as_ref() {
            if active.key == *key {
                return active.clone();
            }
        }

        let mut slot = self.slot.write();
        match slot.as_ref() {
            // Another request may have installed it while we waited.
            Some(active) if active.key == *key => return active.clone(),
            Some(active) => tracing::info!(
                old_key = %active.key.fingerprint(),
                new_key = %key.fingerprint(),
                discarded_records = active.len(),
                "session key changed, replacing collection"
            ),
            None => tracing::info!(
                key = %key.fingerprint(),
                "initializing collection"
            ),
        }

        let fresh = Arc::new(self.build(key));
        *slot = Some(fresh.clone());
        fresh
    }

    /// Clear the collection bound to `key`.
    ///
    /// A key that does not match the active one first replaces it, so the
    /// clear applies to a fresh, already empty collection.
    pub fn clear(&self, key: &SessionKey) {
        let collection = self.acquire(key);
        collection.clear();
        tracing::info!(key = %key.fingerprint(), "collection cleared");
    }

    /// The active collection, without changing state.
    pub fn current(&self) -> Option<Arc<Collection>> {
        self.slot.read().clone()
    }

    pub fn state(&self) -> LifecycleState {
        match self.slot.read().as_ref() {
            Some(active) => LifecycleState::Active(active.key.fingerprint()),
            None => LifecycleState::Uninitialized,
        }
    }

    fn build(&self, key: &SessionKey) -> Collection {
        let embedder = self.embedders.embedder_for(key);
        let index = (self.build_index)(embedder.dims());
        Collection {
            key: key.clone(),
            index: Arc::new(RwLock::new(index)),
            embedder,
            created_at: Utc::now(),
        }
    }
}
