//! Brute-force in-memory [`VectorIndex`].
//!
//! Records live in a `Vec` in insertion order. Search computes cosine
//! similarity against every stored vector (O(n·d) per query) and stable-sorts
//! by score, so equal scores keep insertion order and repeated queries on an
//! unchanged index return identical rankings.

use std::cmp::Ordering;
use std::collections::HashSet;

use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::{CoreError, Result};
use crate::models::{NewRecord, VectorRecord};

use super::{Hit, VectorIndex};

/// In-memory index sized for one interactive document collection.
#[derive(Debug, Default)]
pub struct BruteForceIndex {
    records: Vec<VectorRecord>,
    ids: HashSet<String>,
    dims: Option<usize>,
}

impl BruteForceIndex {
    /// An index that adopts the dimensionality of its first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// An index whose dimensionality is fixed before anything is inserted.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims: Some(dims),
            ..Self::default()
        }
    }

    fn fresh_id(&self, taken: &HashSet<String>) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.ids.contains(&id) && !taken.contains(&id) {
                return id;
            }
        }
    }
}

impl VectorIndex for BruteForceIndex {
    fn insert(&mut self, records: Vec<NewRecord>) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // Validate the whole batch before touching storage.
        let dims = self.dims.unwrap_or(records[0].embedding.len());
        let mut batch_ids: HashSet<String> = HashSet::with_capacity(records.len());
        let mut assigned = Vec::with_capacity(records.len());

        for record in &records {
            let subject = record.id.clone().unwrap_or_else(|| format!("'{}'", preview(&record.text)));
            if record.embedding.is_empty() {
                return Err(CoreError::EmptyEmbedding(subject));
            }
            if record.embedding.len() != dims {
                return Err(CoreError::DimensionMismatch {
                    subject: format!("record {}", subject),
                    expected: dims,
                    found: record.embedding.len(),
                });
            }
            if let Some(id) = &record.id {
                if self.ids.contains(id) || !batch_ids.insert(id.clone()) {
                    return Err(CoreError::DuplicateId(id.clone()));
                }
            }
        }

        for record in &records {
            let id = match &record.id {
                Some(id) => id.clone(),
                None => {
                    let id = self.fresh_id(&batch_ids);
                    batch_ids.insert(id.clone());
                    id
                }
            };
            assigned.push(id);
        }

        self.dims = Some(dims);
        for (record, id) in records.into_iter().zip(assigned.iter()) {
            self.ids.insert(id.clone());
            self.records.push(VectorRecord {
                id: id.clone(),
                text: record.text,
                embedding: record.embedding,
                metadata: record.metadata,
            });
        }

        Ok(assigned)
    }

    fn clear(&mut self) {
        self.records.clear();
        self.ids.clear();
    }

    fn replace(&mut self, records: Vec<NewRecord>) -> Result<Vec<String>> {
        let mut staged = BruteForceIndex {
            dims: self.dims,
            ..Self::default()
        };
        let ids = staged.insert(records)?;
        *self = staged;
        Ok(ids)
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Hit<'_>>> {
        if self.records.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = self.dims {
            if query.len() != dims {
                return Err(CoreError::DimensionMismatch {
                    subject: "query".to_string(),
                    expected: dims,
                    found: query.len(),
                });
            }
        }

        let mut hits: Vec<Hit<'_>> = self
            .records
            .iter()
            .map(|record| Hit {
                record,
                score: cosine_similarity(query, &record.embedding),
            })
            .collect();

        // `sort_by` is stable: ties keep insertion order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    fn kind(&self) -> &'static str {
        "brute_force"
    }
}

fn preview(text: &str) -> String {
    text.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn rec(text: &str, embedding: Vec<f32>) -> NewRecord {
        NewRecord::new(text, embedding, RecordMetadata::default())
    }

    fn texts(hits: &[Hit<'_>]) -> Vec<String> {
        hits.iter().map(|h| h.record.text.clone()).collect()
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let index = BruteForceIndex::new();
        let hits = index.search(&[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_sorted_descending() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![
                rec("far", vec![0.0, 1.0]),
                rec("near", vec![1.0, 0.1]),
                rec("middle", vec![1.0, 1.0]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(texts(&hits), vec!["near", "middle", "far"]);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_fewer_records_than_top_k_returns_all() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![rec("a", vec![1.0, 0.0]), rec("b", vec![0.0, 1.0])])
            .unwrap();
        assert_eq!(index.search(&[1.0, 1.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn test_top_k_truncates() {
        let mut index = BruteForceIndex::new();
        let records = (0..10)
            .map(|i| rec(&format!("r{}", i), vec![1.0, i as f32]))
            .collect();
        index.insert(records).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 4).unwrap().len(), 4);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![
                rec("first", vec![2.0, 0.0]),
                rec("other", vec![0.0, 1.0]),
                rec("second", vec![1.0, 0.0]),
                rec("third", vec![5.0, 0.0]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(texts(&hits), vec!["first", "second", "third"]);

        let again = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(texts(&hits), texts(&again));
    }

    #[test]
    fn test_zero_norm_record_scores_zero() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![rec("zero", vec![0.0, 0.0]), rec("unit", vec![1.0, 0.0])])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[1].record.text, "zero");
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_atomic() {
        let mut index = BruteForceIndex::new();
        index.insert(vec![rec("seed", vec![1.0, 0.0, 0.0])]).unwrap();

        let err = index
            .insert(vec![rec("ok", vec![0.0, 1.0, 0.0]), rec("bad", vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_first_insert_fixes_dims() {
        let mut index = BruteForceIndex::new();
        assert_eq!(index.dims(), None);
        index.insert(vec![rec("a", vec![1.0, 2.0])]).unwrap();
        assert_eq!(index.dims(), Some(2));

        index.clear();
        assert_eq!(index.dims(), Some(2));
        assert!(index.insert(vec![rec("b", vec![1.0])]).is_err());
    }

    #[test]
    fn test_preset_dims_reject_first_batch() {
        let mut index = BruteForceIndex::with_dims(4);
        assert!(index.insert(vec![rec("a", vec![1.0, 2.0])]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_mismatched_batch_against_itself() {
        let mut index = BruteForceIndex::new();
        let err = index
            .insert(vec![rec("a", vec![1.0, 2.0]), rec("b", vec![1.0, 2.0, 3.0])])
            .unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
        assert!(index.is_empty());
        assert_eq!(index.dims(), None);
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let mut index = BruteForceIndex::new();
        let err = index.insert(vec![rec("a", vec![])]).unwrap_err();
        assert!(matches!(err, CoreError::EmptyEmbedding(_)));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = BruteForceIndex::new();
        index.insert(vec![rec("a", vec![1.0, 2.0])]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 2.0, 3.0], 1),
            Err(CoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_generated_ids_unique() {
        let mut index = BruteForceIndex::new();
        let ids = index
            .insert(vec![rec("same", vec![1.0]), rec("same", vec![1.0])])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_supplied_id_collision_rejected() {
        let mut index = BruteForceIndex::new();
        index.insert(vec![rec("a", vec![1.0]).with_id("doc-1")]).unwrap();

        let err = index
            .insert(vec![rec("b", vec![1.0]).with_id("doc-1")])
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId(id) if id == "doc-1"));
        assert_eq!(index.len(), 1);

        let err = index
            .insert(vec![
                rec("c", vec![1.0]).with_id("doc-2"),
                rec("d", vec![1.0]).with_id("doc-2"),
            ])
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_replace_swaps_contents() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![rec("old", vec![1.0, 0.0]).with_id("keep-me")])
            .unwrap();
        index
            .replace(vec![rec("new", vec![0.0, 1.0]).with_id("keep-me")])
            .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(texts(&index.search(&[0.0, 1.0], 5).unwrap()), vec!["new"]);
    }

    #[test]
    fn test_failed_replace_keeps_old_contents() {
        let mut index = BruteForceIndex::new();
        index.insert(vec![rec("old", vec![1.0, 0.0])]).unwrap();
        assert!(index.replace(vec![rec("bad", vec![1.0])]).is_err());
        assert_eq!(texts(&index.search(&[1.0, 0.0], 5).unwrap()), vec!["old"]);
    }

    #[test]
    fn test_clear_then_search_empty() {
        let mut index = BruteForceIndex::new();
        index.insert(vec![rec("a", vec![1.0, 0.0])]).unwrap();
        index.clear();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_does_not_mutate() {
        let mut index = BruteForceIndex::new();
        index
            .insert(vec![rec("a", vec![1.0, 0.0]), rec("b", vec![0.0, 1.0])])
            .unwrap();
        let _ = index.search(&[0.0, 1.0], 2).unwrap();
        let order: Vec<&str> = index.records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
