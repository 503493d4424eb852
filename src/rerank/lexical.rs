//! Fallback reranking without a relevance model.
//!
//! `final = 0.3 * keyword_overlap + 0.7 * vector_similarity`
//!
//! The vector term needs the embedding provider. When an embedding call
//! fails the term is [`ScoreTerm::Unavailable`], contributes 0 and marks the
//! result as degraded, so callers can tell an outage from low relevance.

use super::{finalize, RankedResult, Reranker};
use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::Result;
use crate::ingestion::Tool;
use crate::search::cosine_similarity;
use crate::text::word_segments;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

const KEYWORD_WEIGHT: f32 = 0.3;
const VECTOR_WEIGHT: f32 = 0.7;

/// Outcome of computing one score term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreTerm {
    Scored(f32),
    /// The inputs for this term could not be obtained.
    Unavailable,
}

impl ScoreTerm {
    /// The value to blend into a final score; 0 when unavailable.
    pub fn contribution(self) -> f32 {
        match self {
            ScoreTerm::Scored(v) => v,
            ScoreTerm::Unavailable => 0.0,
        }
    }

    pub fn is_unavailable(self) -> bool {
        matches!(self, ScoreTerm::Unavailable)
    }
}

/// Fraction of distinct query words that also occur in `content`.
///
/// Words are case-insensitive [`word_segments`]. Returns 0 when the query
/// has no words.
pub fn keyword_overlap(query: &str, content: &str) -> f32 {
    let query_words: HashSet<String> = word_segments(query).into_iter().collect();
    if query_words.is_empty() {
        return 0.0;
    }

    let content_words: HashSet<String> = word_segments(content).into_iter().collect();
    let common = query_words.intersection(&content_words).count();

    common as f32 / query_words.len() as f32
}

pub struct LexicalReranker {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LexicalReranker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    async fn embedding(&self, text: &str) -> Option<Vec<f32>> {
        match embed_one(self.embedder.as_ref(), text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(
                    provider = self.embedder.name(),
                    error = %e,
                    "Embedding failed during rerank, vector term unavailable"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Tool>,
        top_n: usize,
    ) -> Result<Vec<RankedResult>> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let documents: Vec<String> = candidates.iter().map(Tool::to_document).collect();
        let keyword_texts: Vec<String> = candidates.iter().map(Tool::keyword_text).collect();

        let query_vector = self.embedding(query).await;
        let candidate_vectors: Vec<Option<Vec<f32>>> = match query_vector {
            // Candidate embeddings are independent of each other
            Some(_) => join_all(documents.iter().map(|doc| self.embedding(doc))).await,
            None => vec![None; documents.len()],
        };

        let mut degraded_terms = 0usize;
        let scored: Vec<(Tool, f32, bool)> = candidates
            .into_iter()
            .zip(keyword_texts.iter())
            .zip(candidate_vectors)
            .map(|((tool, keywords), vector)| {
                let overlap = keyword_overlap(query, keywords);
                let similarity = match (&query_vector, vector) {
                    (Some(q), Some(v)) => ScoreTerm::Scored(cosine_similarity(q, &v).unwrap_or(0.0)),
                    _ => ScoreTerm::Unavailable,
                };

                let degraded = similarity.is_unavailable();
                if degraded {
                    degraded_terms += 1;
                }

                let score =
                    KEYWORD_WEIGHT * overlap + VECTOR_WEIGHT * similarity.contribution();
                (tool, score, degraded)
            })
            .collect();

        if degraded_terms > 0 {
            metrics::counter!("rerank_degraded_terms_total").increment(degraded_terms as u64);
            tracing::warn!(
                degraded_terms,
                candidates = documents.len(),
                "Lexical rerank scored some candidates without the vector term"
            );
        }

        let results = finalize(scored, top_n);

        tracing::debug!(
            candidates = documents.len(),
            returned = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Lexical rerank completed"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::error::AppError;
    use crate::ingestion::ToolArg;

    /// Fails every call whose text contains "offline".
    struct SelectiveProvider {
        inner: HashingEmbedder,
    }

    #[async_trait]
    impl EmbeddingProvider for SelectiveProvider {
        fn name(&self) -> &str {
            "selective"
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        fn max_batch_size(&self) -> usize {
            self.inner.max_batch_size()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("offline")) {
                return Err(AppError::EmbeddingError("connection refused".to_string()));
            }
            self.inner.embed(texts).await
        }
    }

    fn reranker() -> LexicalReranker {
        LexicalReranker::new(Arc::new(SelectiveProvider {
            inner: HashingEmbedder::new(256, 10),
        }))
    }

    #[test]
    fn test_identical_text_has_full_overlap() {
        let text = "get weather for a city";
        assert_eq!(keyword_overlap(text, text), 1.0);
    }

    #[test]
    fn test_overlap_is_case_insensitive_fraction() {
        assert_eq!(keyword_overlap("Stock PRICE now", "stock price"), 2.0 / 3.0);
        assert_eq!(keyword_overlap("查询AAPL股票", "symbol: AAPL"), 1.0 / 3.0);
    }

    #[test]
    fn test_overlap_of_wordless_query_is_zero() {
        assert_eq!(keyword_overlap("", "anything"), 0.0);
        assert_eq!(keyword_overlap("?!，", "anything"), 0.0);
    }

    #[test]
    fn test_score_term_contribution() {
        assert_eq!(ScoreTerm::Scored(-0.4).contribution(), -0.4);
        assert_eq!(ScoreTerm::Unavailable.contribution(), 0.0);
        assert!(ScoreTerm::Unavailable.is_unavailable());
    }

    #[tokio::test]
    async fn test_empty_candidates_give_empty_output() {
        assert!(reranker().rerank("q", vec![], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ranks_relevant_tool_first_within_bounds() {
        let weather = Tool::new("get_weather", "current weather in a city", vec![ToolArg::new("city", "city name")]);
        let stock = Tool::new("get_stock_price", "latest stock price", vec![ToolArg::new("symbol", "ticker symbol")]);
        let stock_id = stock.id;

        let results = reranker()
            .rerank("stock price for a ticker symbol", vec![weather, stock], 5)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_id, stock_id);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        for r in &results {
            assert!(r.score >= -0.7 - 1e-6 && r.score <= 1.0 + 1e-6);
            assert!(!r.degraded);
        }
    }

    #[tokio::test]
    async fn test_failed_candidate_embedding_degrades_only_that_candidate() {
        let healthy = Tool::new("alpha", "alpha tool", vec![]);
        let broken = Tool::new("beta", "offline tool", vec![]);
        let broken_id = broken.id;

        let results = reranker()
            .rerank("alpha", vec![healthy, broken], 5)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let degraded: Vec<_> = results.iter().filter(|r| r.degraded).collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].tool_id, broken_id);
        // Only the keyword term remains, and "alpha" is absent from it
        assert_eq!(degraded[0].score, 0.0);
    }

    #[tokio::test]
    async fn test_failed_query_embedding_degrades_every_candidate() {
        let tools = vec![
            Tool::new("offline_sync", "sync data", vec![]),
            Tool::new("other", "something else", vec![]),
        ];

        let results = reranker().rerank("offline sync", tools, 5).await.unwrap();

        assert!(results.iter().all(|r| r.degraded));
        // "offline_sync" splits into both query words
        assert!((results[0].score - KEYWORD_WEIGHT).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_field_labels_do_not_count_as_keywords() {
        let tools = vec![
            Tool::new("get_weather", "weather in a city", vec![ToolArg::new("city", "city")]),
            Tool::new("get_time", "time in a zone", vec![]),
        ];

        // Query embedding fails, so only the keyword term is left
        let results = reranker()
            .rerank("offline name description args", tools, 5)
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.degraded && r.score == 0.0));
    }

    #[tokio::test]
    async fn test_truncates_to_top_n() {
        let tools: Vec<Tool> = (0..6).map(|i| Tool::new(format!("tool{}", i), "d", vec![])).collect();
        let results = reranker().rerank("tool", tools, 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
