//! Exact similarity search by scanning every stored slice.
//!
//! O(total slices) per query. Fine for small and medium catalogs, and the
//! reference the approximate backend is measured against.

use super::{cosine_similarity, finalize_hits, IndexedSlice, SimilarityIndex, SliceHit};
use crate::error::{AppError, Result};
use uuid::Uuid;

pub struct LinearScanIndex {
    dimension: usize,
    /// Kept in insertion order.
    slices: Vec<IndexedSlice>,
}

impl LinearScanIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            slices: Vec::new(),
        }
    }
}

impl SimilarityIndex for LinearScanIndex {
    fn backend(&self) -> &'static str {
        "linear"
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
        self.slices.push(slice);
        Ok(())
    }

    fn remove_owner(&mut self, owner: &Uuid) -> usize {
        let before = self.slices.len();
        self.slices.retain(|s| &s.owner != owner);
        before - self.slices.len()
    }

    fn search(&self, query: &[f32], limit: usize) -> Vec<SliceHit> {
        if limit == 0 {
            return Vec::new();
        }

        let scored: Vec<(u64, SliceHit)> = self
            .slices
            .iter()
            .filter_map(|slice| {
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
        self.slices.len()
    }

    fn clear(&mut self) {
        self.slices.clear();
    }

    fn slices(&self) -> Vec<IndexedSlice> {
        self.slices.clone()
    }
}
