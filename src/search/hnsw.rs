//! HNSW-based approximate nearest neighbour search over slice vectors.
//!
//! The graph proposes candidates; their scores are recomputed exactly from
//! the stored vectors so ordering and tie-breaking match the linear scan.

use super::{cosine_similarity, finalize_hits, IndexedSlice, SimilarityIndex, SliceHit};
use crate::error::{AppError, Result};
use hnsw_rs::prelude::{DistCosine, Hnsw};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// HNSW construction and search parameters.
#[derive(Debug, Clone)]
pub struct HnswParams {
    /// Bidirectional links per node. Typical range: 8-32.
    pub m: usize,
    /// Candidate list size during construction. Typical range: 100-400.
    pub ef_construction: usize,
    /// Candidate list size during search. Raised to the requested k if lower.
    pub ef_search: usize,
    /// Capacity hint; the graph is rebuilt or rejects inserts beyond it.
    pub max_elements: usize,
    /// hnsw_rs caps this at 16.
    pub max_layer: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
            max_layer: 16,
        }
    }
}

/// Removal is by tombstone: removed nodes stay in the graph but are
/// filtered from results until the next [`rebuild`](SimilarityIndex::rebuild).
pub struct HnswIndex {
    hnsw: Hnsw<f32, DistCosine>,
    /// Live slices by graph id. Zero-magnitude slices are kept here but
    /// never enter the graph.
    entries: HashMap<usize, IndexedSlice>,
    by_owner: HashMap<Uuid, Vec<usize>>,
    deleted: HashSet<usize>,
    /// Nodes inserted into the current graph, including tombstoned ones.
    graph_len: usize,
    next_id: usize,
    dimension: usize,
    params: HnswParams,
}

impl HnswIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            hnsw: Self::graph(&params),
            entries: HashMap::new(),
            by_owner: HashMap::new(),
            deleted: HashSet::new(),
            graph_len: 0,
            next_id: 0,
            dimension,
            params,
        }
    }

    fn graph(params: &HnswParams) -> Hnsw<f32, DistCosine> {
        Hnsw::new(
            params.m,
            params.max_elements,
            params.max_layer.min(16),
            params.ef_construction,
            DistCosine {},
        )
    }

    fn is_zero(vector: &[f32]) -> bool {
        vector.iter().all(|&x| x == 0.0)
    }

    fn insert_entry(&mut self, slice: IndexedSlice) {
        let id = self.next_id;
        self.next_id += 1;

        if !Self::is_zero(&slice.vector) {
            self.hnsw.insert((&slice.vector, id));
            self.graph_len += 1;
        }

        self.by_owner.entry(slice.owner).or_default().push(id);
        self.entries.insert(id, slice);
    }
}

impl SimilarityIndex for HnswIndex {
    fn backend(&self) -> &'static str {
        "hnsw"
    }

    fn insert(&mut self, slice: IndexedSlice) -> Result<()> {
        if slice.vector.len() != self.dimension {
            return Err(AppError::StoreError(format!(
                "Slice {} has dimension {}, index expects {}",
                slice.key,
                slice.vector.len(),
                self.dimension
            )));
        }

        if self.graph_len >= self.params.max_elements && !self.deleted.is_empty() {
            self.rebuild();
        }
        if self.graph_len >= self.params.max_elements {
            return Err(AppError::StoreError(format!(
                "HNSW index is full ({} elements)",
                self.params.max_elements
            )));
        }

        self.insert_entry(slice);
        Ok(())
    }

    fn remove_owner(&mut self, owner: &Uuid) -> usize {
        let Some(ids) = self.by_owner.remove(owner) else {
            return 0;
        };

        for id in &ids {
            if let Some(slice) = self.entries.remove(id) {
                if !Self::is_zero(&slice.vector) {
                    self.deleted.insert(*id);
                }
            }
        }

        if self.deleted.len() > self.entries.len() {
            self.rebuild();
        }

        ids.len()
    }

    fn search(&self, query: &[f32], limit: usize) -> Vec<SliceHit> {
        if limit == 0 || self.graph_len == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        if Self::is_zero(query) {
            return Vec::new();
        }

        // Ask for extra neighbours to make up for tombstones
        let knbn = limit.saturating_add(self.deleted.len()).min(self.graph_len);
        let ef_search = self.params.ef_search.max(knbn);
        let neighbours = self.hnsw.search(query, knbn, ef_search);

        let scored: Vec<(u64, SliceHit)> = neighbours
            .into_iter()
            .filter(|n| !self.deleted.contains(&n.d_id))
            .filter_map(|n| {
                let slice = self.entries.get(&n.d_id)?;
                let score = cosine_similarity(query, &slice.vector)?;
                Some((
                    slice.seq,
                    SliceHit {
                        tool_id: slice.owner,
                        score,
                        rank: 0,
                        kind: Some(slice.kind),
                    },
                ))
            })
            .collect();

        finalize_hits(scored, limit)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.hnsw = Self::graph(&self.params);
        self.entries.clear();
        self.by_owner.clear();
        self.deleted.clear();
        self.graph_len = 0;
        self.next_id = 0;
    }

    fn slices(&self) -> Vec<IndexedSlice> {
        let mut slices: Vec<IndexedSlice> = self.entries.values().cloned().collect();
        slices.sort_by_key(|s| s.seq);
        slices
    }

    fn rebuild(&mut self) {
        let live = self.slices();
        let dropped = self.deleted.len();
        let start = std::time::Instant::now();

        self.clear();
        for slice in live {
            self.insert_entry(slice);
        }

        tracing::debug!(
            active = self.entries.len(),
            dropped,
            duration_ms = start.elapsed().as_millis() as u64,
            "HNSW index rebuilt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::SliceKind;

    fn slice(seq: u64, owner: u128, vector: Vec<f32>) -> IndexedSlice {
        IndexedSlice {
            seq,
            key: format!("tool_slices:{}:{}", owner, seq),
            owner: Uuid::from_u128(owner),
            kind: SliceKind::Parameter,
            vector,
        }
    }

    fn small_index() -> HnswIndex {
        let mut index = HnswIndex::new(3, HnswParams::default());
        index.insert(slice(0, 1, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(slice(1, 2, vec![0.0, 1.0, 0.0])).unwrap();
        index.insert(slice(2, 3, vec![0.0, 0.0, 1.0])).unwrap();
        index.insert(slice(3, 1, vec![0.9, 0.1, 0.0])).unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_exact_cosine() {
        let index = small_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 2);

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.tool_id == Uuid::from_u128(1)));
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].rank, 1);
    }

    #[test]
    fn test_unbounded_limit_with_tombstones_returns_live_slices() {
        let mut index = small_index();
        assert_eq!(index.remove_owner(&Uuid::from_u128(2)), 1);

        let hits = index.search(&[1.0, 0.0, 0.0], usize::MAX);

        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.tool_id != Uuid::from_u128(2)));
        assert_eq!(hits[0].tool_id, Uuid::from_u128(1));
    }

    #[test]
    fn test_removed_owner_disappears_from_results() {
        let mut index = small_index();
        assert_eq!(index.remove_owner(&Uuid::from_u128(1)), 2);
        assert_eq!(index.len(), 2);

        let hits = index.search(&[1.0, 0.0, 0.0], 10);
        assert!(hits.iter().all(|h| h.tool_id != Uuid::from_u128(1)));
    }

    #[test]
    fn test_zero_query_returns_nothing() {
        let index = small_index();
        assert!(index.search(&[0.0, 0.0, 0.0], 10).is_empty());
    }

    #[test]
    fn test_zero_slice_is_stored_but_never_returned() {
        let mut index = small_index();
        index.insert(slice(4, 9, vec![0.0, 0.0, 0.0])).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index
            .search(&[1.0, 1.0, 1.0], 10)
            .iter()
            .all(|h| h.tool_id != Uuid::from_u128(9)));
    }

    #[test]
    fn test_rebuild_keeps_live_slices_in_order() {
        let mut index = small_index();
        index.remove_owner(&Uuid::from_u128(2));
        index.rebuild();

        assert!(index.deleted.is_empty());
        let seqs: Vec<u64> = index.slices().iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![0, 2, 3]);
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 1)[0].tool_id, Uuid::from_u128(3));
    }
}
