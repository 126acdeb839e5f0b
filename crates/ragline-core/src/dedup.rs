//! Collapse passages that appear verbatim more than once.
//!
//! Overlapping chunks can surface the same passage several times. Results
//! are grouped by exact, byte-for-byte text equality (metadata is ignored);
//! each group keeps its highest-scoring entry, the first one on ties. Groups
//! stay in the order their text was first seen; the output is not re-sorted.

use std::collections::HashMap;

use crate::models::RetrievalResult;

/// Deduplicate a ranked result list by passage text.
pub fn dedupe(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut slot_of: HashMap<String, usize> = HashMap::with_capacity(results.len());
    let mut kept: Vec<RetrievalResult> = Vec::with_capacity(results.len());

    for result in results {
        match slot_of.get(&result.text) {
            Some(&slot) => {
                if result.score > kept[slot].score {
                    kept[slot] = result;
                }
            }
            None => {
                slot_of.insert(result.text.clone(), kept.len());
                kept.push(result);
            }
        }
    }

    kept
}
