//! Final-stage reranking of coarse candidates.
//!
//! Two interchangeable strategies implement [`Reranker`]:
//! - [`ModelReranker`] delegates relevance to a cross-encoder [`RelevanceModel`]
//! - [`LexicalReranker`] blends keyword overlap with embedding similarity
//!
//! Both return an empty list for no candidates, at most `top_n` results and
//! contiguous 1-based ranks in output order.

pub mod cross_encoder;
pub mod lexical;

pub use cross_encoder::{CrossEncoder, ModelReranker, RelevanceModel, ScoredDocument};
pub use lexical::{keyword_overlap, LexicalReranker, ScoreTerm};

use crate::config::{Config, RerankStrategy};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::ingestion::Tool;
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

/// One entry of the final, user-visible ordering.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub tool_id: Uuid,
    pub tool: Tool,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    /// True when part of the score could not be computed and counted as 0.
    pub degraded: bool,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Strategy name for logs and stats.
    fn name(&self) -> &'static str;

    /// Order `candidates` by relevance to `query`, keeping at most `top_n`.
    async fn rerank(&self, query: &str, candidates: Vec<Tool>, top_n: usize)
        -> Result<Vec<RankedResult>>;
}

/// Sort scored tools by descending score, truncate and assign ranks.
///
/// The sort is stable: equal scores keep candidate order.
pub(crate) fn finalize(mut scored: Vec<(Tool, f32, bool)>, top_n: usize) -> Vec<RankedResult> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    scored
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, (tool, score, degraded))| RankedResult {
            tool_id: tool.id,
            tool,
            score,
            rank: i + 1,
            degraded,
        })
        .collect()
}

/// Construct the strategy selected by configuration.
pub fn build_reranker(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn Reranker>> {
    let reranker: Arc<dyn Reranker> = match config.rerank_strategy {
        RerankStrategy::Model => {
            let model = CrossEncoder::load(config)?;
            model.warmup()?;
            Arc::new(ModelReranker::new(Arc::new(model)))
        }
        RerankStrategy::Lexical => Arc::new(LexicalReranker::new(embedder)),
    };

    tracing::info!(strategy = reranker.name(), "Reranker ready");
    Ok(reranker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_truncates_and_ranks_from_one() {
        let tools: Vec<Tool> = (0..4).map(|i| Tool::new(format!("t{}", i), "", vec![])).collect();
        let scored = vec![
            (tools[0].clone(), 0.1, false),
            (tools[1].clone(), 0.9, false),
            (tools[2].clone(), -0.5, true),
            (tools[3].clone(), 0.9, false),
        ];

        let results = finalize(scored, 3);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tool_id, tools[1].id);
        assert_eq!(results[1].tool_id, tools[3].id);
        assert_eq!(results[2].tool_id, tools[0].id);
        assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_finalize_keeps_negative_scores() {
        let tool = Tool::new("t", "", vec![]);
        let results = finalize(vec![(tool, -0.7, false)], 5);
        assert_eq!(results[0].score, -0.7);
    }
}
