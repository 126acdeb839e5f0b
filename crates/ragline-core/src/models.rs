//! Core data models for the retrieval engine.
//!
//! These types represent the passages that flow from ingestion into the
//! vector index and back out as retrieval results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The credential that scopes which collection a request reads or writes.
///
/// The raw key never appears in `Debug` output; use [`SessionKey::fingerprint`]
/// when a key has to be identified in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw credential, for forwarding to the external providers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars of the SHA-256 of the key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Metadata attached to a passage.
///
/// `file_name` and `page_label` are the attributes the context composer reads
/// for source attribution; anything else the ingestion side knows about a
/// passage goes into `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RecordMetadata {
    pub fn for_page(file_name: impl Into<String>, page_label: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            page_label: Some(page_label.into()),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A text passage produced by the ingestion collaborator, not yet embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: RecordMetadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: RecordMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A record offered for insertion.
///
/// When `id` is `None` the index assigns a fresh UUID.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl NewRecord {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>, metadata: RecordMetadata) -> Self {
        Self {
            id: None,
            text: text.into(),
            embedding,
            metadata,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A record stored in a [`VectorIndex`](crate::index::VectorIndex).
///
/// Similarity scores are not stored here: they are derived per query and
/// carried by [`Hit`](crate::index::Hit).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Read-only projection of a ranked record, returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}
