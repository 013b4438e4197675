//! Rebuildable in-memory nearest-neighbor index.
//!
//! A materialized view of the durable store used for the low-latency query
//! path and as a best-effort fallback when the store is degraded. The index
//! is a cache, not a source of truth: all mutation is a wholesale `build`
//! that swaps in a fresh snapshot behind a single `Arc` replace, so readers
//! always see one complete snapshot (the previous one until the swap, the
//! new one after) and never a transiently empty structure.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::stores::{SearchHit, VectorRecord};

/// One indexed chunk: the `(text, embedding, metadata)` triple.
#[derive(Clone, Debug)]
struct IndexEntry {
    text: String,
    embedding: Vec<f32>,
    metadata: serde_json::Value,
}

/// An immutable, versioned view over the indexed chunks.
#[derive(Debug, Default)]
struct IndexSnapshot {
    version: u64,
    entries: Vec<IndexEntry>,
}

/// Brute-force cosine index over the current snapshot.
pub struct InMemoryIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl InMemoryIndex {
    /// Creates an index holding an empty, queryable snapshot.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    /// Replaces the current snapshot with one built from `records`.
    ///
    /// Building from an empty slice yields a valid empty index, not an error
    /// state.
    pub fn build(&self, records: &[VectorRecord]) {
        let entries: Vec<IndexEntry> = records
            .iter()
            .map(|record| IndexEntry {
                text: record.text.clone(),
                embedding: record.embedding.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();

        let mut guard = self.snapshot.write();
        let next = IndexSnapshot {
            version: guard.version + 1,
            entries,
        };
        debug!(version = next.version, entries = next.entries.len(), "index snapshot swapped");
        *guard = Arc::new(next);
    }

    /// Top-`k` entries by cosine similarity against the current snapshot.
    ///
    /// Returns fewer than `k` hits when the snapshot holds fewer entries and
    /// an empty vector on an empty index. Entries whose embedding length
    /// disagrees with the query are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let snapshot = Arc::clone(&self.snapshot.read());
        if k == 0 || snapshot.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &IndexEntry)> = snapshot
            .entries
            .iter()
            .filter_map(|entry| cosine_similarity(query, &entry.embedding).map(|s| (s, entry)))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| SearchHit {
                text: entry.text.clone(),
                score,
                metadata: entry.metadata.clone(),
            })
            .collect()
    }

    /// Number of entries in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().entries.is_empty()
    }

    /// Monotonic snapshot version; bumps on every build.
    pub fn version(&self) -> u64 {
        self.snapshot.read().version
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((dot / denom) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(text: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord::new("docs/a.txt", 0, text, embedding)
            .with_metadata(json!({"text": text}))
    }

    #[test]
    fn empty_index_answers_with_no_hits() {
        let index = InMemoryIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn build_from_empty_slice_is_a_valid_state() {
        let index = InMemoryIndex::new();
        index.build(&[record("x", vec![1.0, 0.0])]);
        index.build(&[]);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn nearest_entries_come_back_first() {
        let index = InMemoryIndex::new();
        index.build(&[
            record("east", vec![1.0, 0.0]),
            record("north", vec![0.0, 1.0]),
            record("northeast", vec![0.7, 0.7]),
        ]);

        let hits = index.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[1].text, "northeast");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let index = InMemoryIndex::new();
        index.build(&[record("only", vec![1.0, 0.0])]);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 1);
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let index = InMemoryIndex::new();
        index.build(&[
            record("good", vec![1.0, 0.0]),
            record("bad", vec![1.0, 0.0, 0.0]),
        ]);
        let hits = index.search(&[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "good");
    }

    #[test]
    fn rebuild_replaces_rather_than_accumulates() {
        let index = InMemoryIndex::new();
        index.build(&[record("old", vec![1.0, 0.0])]);
        index.build(&[record("new", vec![0.0, 1.0])]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&[0.0, 1.0], 1)[0].text, "new");
    }
}
