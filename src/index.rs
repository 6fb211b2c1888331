//! In-memory vector index.
//!
//! A flat list of `(chunk, vector)` entries searched by brute-force cosine
//! similarity. Results are sorted by descending score; equal scores keep
//! insertion order.
//!
//! [`SharedIndex`] holds the index the server searches. A rebuild assembles a
//! complete [`VectorIndex`] separately and swaps it in with [`SharedIndex::replace`],
//! so searches see either the old or the new index, never a partial one.

use std::sync::{Arc, RwLock};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, SearchHit};

struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chunk: Chunk, vector: Vec<f32>) {
        self.entries.push(IndexEntry { chunk, vector });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return at most `k` entries most similar to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();

        // Stable sort keeps insertion order among ties; NaN scores rank last.
        let rank = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
        scored.sort_by(|a, b| rank(b.1).total_cmp(&rank(a.1)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }
}

/// The currently published index, replaced atomically on rebuild.
#[derive(Default)]
pub struct SharedIndex {
    current: RwLock<Arc<VectorIndex>>,
}

impl SharedIndex {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// Cheap handle to the current index; unaffected by later swaps.
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, index: VectorIndex) {
        let next = Arc::new(index);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.snapshot().search(query, k)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            source: "doc.pdf".to_string(),
            page: 1,
            chunk_index: 0,
            start: 0,
            text: text.to_string(),
            hash: content_hash(text),
        }
    }

    fn sample() -> VectorIndex {
        let mut index = VectorIndex::new();
        index.add(chunk("east"), vec![1.0, 0.0]);
        index.add(chunk("north"), vec![0.0, 1.0]);
        index.add(chunk("north-east"), vec![1.0, 1.0]);
        index.add(chunk("west"), vec![-1.0, 0.0]);
        index
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let hits = sample().search(&[1.0, 0.1], 3);
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east", "north"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_returns_at_most_k() {
        let index = sample();
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 4);
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
        assert!(VectorIndex::new().search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new();
        index.add(chunk("first"), vec![2.0, 0.0]);
        index.add(chunk("second"), vec![1.0, 0.0]);
        index.add(chunk("third"), vec![3.0, 0.0]);
        let hits = index.search(&[1.0, 0.0], 3);
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_nan_vectors_rank_last() {
        let mut index = VectorIndex::new();
        index.add(chunk("broken"), vec![f32::NAN, 0.0]);
        index.add(chunk("east"), vec![1.0, 0.0]);
        index.add(chunk("north"), vec![0.0, 1.0]);
        let hits = index.search(&[1.0, 0.0], 3);
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north", "broken"]);
    }

    #[test]
    fn test_results_are_added_entries() {
        let index = sample();
        let added = ["east", "north", "north-east", "west"];
        for hit in index.search(&[0.3, -0.7], 4) {
            assert!(added.contains(&hit.chunk.text.as_str()));
        }
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedIndex::new(sample());
        let before = shared.snapshot();

        let mut rebuilt = VectorIndex::new();
        rebuilt.add(chunk("only"), vec![1.0, 0.0]);
        shared.replace(rebuilt);

        assert_eq!(before.len(), 4);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared.search(&[1.0, 0.0], 3)[0].chunk.text, "only");
    }

    #[test]
    fn test_concurrent_search_sees_whole_index() {
        let shared = Arc::new(SharedIndex::new(sample()));
        let reader = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let n = shared.snapshot().len();
                    assert!(n == 4 || n == 50, "observed partial index of {}", n);
                }
            })
        };
        for _ in 0..20 {
            let mut big = VectorIndex::new();
            for i in 0..50 {
                big.add(chunk(&format!("c{}", i)), vec![i as f32, 1.0]);
            }
            shared.replace(big);
            shared.replace(sample());
        }
        reader.join().unwrap();
    }
}
