//! Aggregation of slice hits into tool-level scores.

use super::SliceHit;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Aggregate score of one tool for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoarseScore {
    pub tool_id: Uuid,
    pub score: f64,
}

/// Reciprocal-rank aggregation of slice hits.
///
/// Each hit contributes `1 / (rank + 1)` to its tool, where `rank` is the
/// hit's 1-based position in the sequence handed to [`rank`](Self::rank).
/// Tools matched by several slices accumulate, and higher hits weigh more.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoarseRanker;

impl CoarseRanker {
    pub fn new() -> Self {
        Self
    }

    /// Per-tool scores, descending. Equal scores are ordered by tool id.
    pub fn rank(&self, hits: &[SliceHit]) -> Vec<CoarseScore> {
        let mut totals: BTreeMap<Uuid, f64> = BTreeMap::new();

        for (position, hit) in hits.iter().enumerate() {
            let rank = (position + 1) as f64;
            *totals.entry(hit.tool_id).or_default() += 1.0 / (rank + 1.0);
        }

        let mut scores: Vec<CoarseScore> = totals
            .into_iter()
            .map(|(tool_id, score)| CoarseScore { tool_id, score })
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });

        scores
    }

    /// The first `top_m` tool ids; all of them if fewer matched.
    pub fn select_candidates(&self, scores: &[CoarseScore], top_m: usize) -> Vec<Uuid> {
        scores.iter().take(top_m).map(|s| s.tool_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Uuid = Uuid::from_u128(0xA);
    const B: Uuid = Uuid::from_u128(0xB);

    fn hit(tool_id: Uuid, rank: usize) -> SliceHit {
        SliceHit {
            tool_id,
            score: 1.0 - rank as f32 * 0.1,
            rank,
            kind: None,
        }
    }

    fn scenario() -> Vec<SliceHit> {
        vec![hit(A, 1), hit(B, 2), hit(A, 3)]
    }

    #[test]
    fn test_reciprocal_rank_aggregation() {
        let scores = CoarseRanker::new().rank(&scenario());

        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].tool_id, A);
        assert!((scores[0].score - 0.75).abs() < 1e-12);
        assert_eq!(scores[1].tool_id, B);
        assert!((scores[1].score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_select_candidates_truncates() {
        let ranker = CoarseRanker::new();
        let scores = ranker.rank(&scenario());
        assert_eq!(ranker.select_candidates(&scores, 1), vec![A]);
    }

    #[test]
    fn test_select_candidates_never_pads() {
        let ranker = CoarseRanker::new();
        let scores = ranker.rank(&scenario());
        assert_eq!(ranker.select_candidates(&scores, 10), vec![A, B]);
    }

    #[test]
    fn test_equal_scores_order_by_tool_id() {
        let ranker = CoarseRanker::new();
        let filler = Uuid::from_u128(0xF);
        // A: 1/2. B: 1/3 + 1/6. Both 0.5.
        let hits = vec![hit(A, 1), hit(B, 2), hit(filler, 3), hit(filler, 4), hit(B, 5)];

        let first = ranker.rank(&hits);
        assert!((first[0].score - first[1].score).abs() < 1e-12);
        for _ in 0..10 {
            assert_eq!(ranker.rank(&hits), first);
        }
        if first[0].score == first[1].score {
            assert_eq!(first[0].tool_id, A);
        }
    }

    #[test]
    fn test_empty_hits_yield_no_scores() {
        assert!(CoarseRanker::new().rank(&[]).is_empty());
    }
}
