//! Slice-level similarity search and tool-level coarse ranking.
//!
//! [`SimilarityIndex`] is the capability behind the vector store: given a
//! query vector it returns the most similar slices across the corpus. Two
//! backends implement it, an exact [`LinearScanIndex`] and an approximate
//! [`HnswIndex`]; callers never depend on which one is configured.

pub mod coarse;
pub mod hnsw;
pub mod linear;

pub use coarse::{CoarseRanker, CoarseScore};
pub use hnsw::{HnswIndex, HnswParams};
pub use linear::LinearScanIndex;

use crate::config::VectorBackend;
use crate::error::Result;
use crate::ingestion::SliceKind;
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

/// A slice as held by a similarity index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSlice {
    /// Insertion sequence number; breaks similarity ties.
    pub seq: u64,
    /// Store key, scoped to the owning tool.
    pub key: String,
    pub owner: Uuid,
    pub kind: SliceKind,
    pub vector: Vec<f32>,
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceHit {
    pub tool_id: Uuid,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    pub kind: Option<SliceKind>,
}

pub trait SimilarityIndex: Send + Sync {
    /// Backend name for logs and stats.
    fn backend(&self) -> &'static str;

    fn insert(&mut self, slice: IndexedSlice) -> Result<()>;

    /// Remove every slice owned by `owner`, returning how many were removed.
    fn remove_owner(&mut self, owner: &Uuid) -> usize;

    /// The `limit` most similar slices, by descending cosine similarity.
    ///
    /// Equal scores are ordered by insertion sequence. Slices whose cosine is
    /// undefined (zero magnitude on either side) are left out.
    fn search(&self, query: &[f32], limit: usize) -> Vec<SliceHit>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Live slices in insertion order.
    fn slices(&self) -> Vec<IndexedSlice>;

    /// Reclaim space held by removed slices. No-op for exact backends.
    fn rebuild(&mut self) {}
}

/// Construct the backend selected by configuration.
pub fn build_index(backend: VectorBackend, dimension: usize) -> Box<dyn SimilarityIndex> {
    match backend {
        VectorBackend::Linear => Box::new(LinearScanIndex::new(dimension)),
        VectorBackend::Hnsw => Box::new(HnswIndex::new(dimension, HnswParams::default())),
    }
}

/// Cosine similarity, or `None` when either vector has zero magnitude or
/// the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }

    let sim = dot / (mag_a * mag_b);
    sim.is_finite().then_some(sim)
}

/// Sort `(seq, hit)` pairs by descending score then ascending seq, truncate
/// to `limit` and assign 1-based ranks.
pub(crate) fn finalize_hits(mut scored: Vec<(u64, SliceHit)>, limit: usize) -> Vec<SliceHit> {
    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| seq_a.cmp(seq_b))
    });

    scored
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (_, mut hit))| {
            hit.rank = i + 1;
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_undefined() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_cosine_length_mismatch_is_undefined() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_finalize_breaks_ties_by_sequence() {
        let hit = |id: u128, score: f32| SliceHit {
            tool_id: Uuid::from_u128(id),
            score,
            rank: 0,
            kind: None,
        };
        let hits = finalize_hits(
            vec![(5, hit(1, 0.5)), (2, hit(2, 0.5)), (9, hit(3, 0.9))],
            10,
        );
        let ids: Vec<u128> = hits.iter().map(|h| h.tool_id.as_u128()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
