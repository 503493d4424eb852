//! Model-scored reranking with a cross-encoder.

use super::{finalize, RankedResult, Reranker};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::inference::{CrossEncoderModel, PairTokenizer};
use crate::ingestion::Tool;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// A document with its relevance score for some query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: String,
    pub score: f32,
}

/// External relevance model scoring `(query, document)` pairs.
///
/// Output order is up to the model; results are matched back to inputs by
/// document content.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<ScoredDocument>>;
}

/// Local ONNX cross-encoder (bge-reranker style, sigmoid over logits).
pub struct CrossEncoder {
    model: Arc<CrossEncoderModel>,
    tokenizer: Arc<PairTokenizer>,
    /// One permit per pooled session.
    semaphore: Semaphore,
    batch_size: usize,
    timeout: Duration,
}

impl CrossEncoder {
    pub fn load(config: &Config) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });

        let model = CrossEncoderModel::load_pool(&config.model_path, pool_size)?;
        let tokenizer = PairTokenizer::load(&config.tokenizer_path, config.max_sequence_length)?;

        Ok(Self::new(
            model,
            tokenizer,
            config.batch_size,
            Duration::from_secs(config.external_timeout_secs),
        ))
    }

    pub fn new(
        model: CrossEncoderModel,
        tokenizer: PairTokenizer,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        let permits = model.pool_size();
        Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            semaphore: Semaphore::new(permits),
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Run one inference so the first real query skips ONNX Runtime's lazy
    /// initialization.
    pub fn warmup(&self) -> Result<()> {
        tracing::info!("Running cross-encoder warmup...");
        let batch = self
            .tokenizer
            .encode_pairs("warmup query", &["warmup document".to_string()])?;
        let _ = self.model.logits(batch)?;
        tracing::info!("Cross-encoder warmup completed");
        Ok(())
    }
}

#[async_trait]
impl RelevanceModel for CrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<ScoredDocument>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        // 503 if every session stays busy
        let _permit = tokio::time::timeout(Duration::from_secs(5), self.semaphore.acquire())
            .await
            .map_err(|_| {
                AppError::ResourceError("Cross-encoder overloaded, please retry".to_string())
            })?
            .map_err(|_| AppError::ResourceError("Semaphore closed".to_string()))?;

        let model = Arc::clone(&self.model);
        let tokenizer = Arc::clone(&self.tokenizer);
        let query = query.to_string();
        let docs = documents.to_vec();
        let batch_size = self.batch_size;

        let logits = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || {
                let mut logits = Vec::with_capacity(docs.len());
                for chunk in docs.chunks(batch_size) {
                    let batch = tokenizer.encode_pairs(&query, chunk)?;
                    logits.extend(model.logits(batch)?);
                }
                Ok::<_, AppError>(logits)
            }),
        )
        .await
        .map_err(|_| {
            AppError::ResourceError(format!(
                "Cross-encoder timeout exceeded ({}s)",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::ModelError(format!("Task join error: {}", e)))??;

        let mut scored: Vec<ScoredDocument> = logits
            .into_iter()
            .zip(documents.iter())
            .map(|(logit, document)| ScoredDocument {
                document: document.clone(),
                score: sigmoid(logit),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(scored)
    }
}

/// Sigmoid activation: 1 / (1 + e^-x)
#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Reranker backed by a [`RelevanceModel`].
///
/// Each candidate is serialized with [`Tool::to_document`]; scored output is
/// matched back to candidates by exact document content. Candidates with
/// identical content are matched in candidate order, each one once.
pub struct ModelReranker {
    model: Arc<dyn RelevanceModel>,
}

impl ModelReranker {
    pub fn new(model: Arc<dyn RelevanceModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Reranker for ModelReranker {
    fn name(&self) -> &'static str {
        "model"
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

        let mut by_content: HashMap<&str, VecDeque<usize>> = HashMap::new();
        for (i, doc) in documents.iter().enumerate() {
            by_content.entry(doc.as_str()).or_default().push_back(i);
        }

        let scored = self.model.score(query, &documents).await?;

        let mut slots: Vec<Option<Tool>> = candidates.into_iter().map(Some).collect();
        let mut matched = Vec::with_capacity(scored.len());
        for result in scored {
            let index = by_content
                .get_mut(result.document.as_str())
                .and_then(VecDeque::pop_front);
            match index.and_then(|i| slots[i].take()) {
                Some(tool) => matched.push((tool, result.score, false)),
                None => {
                    tracing::warn!("Relevance model returned a document matching no candidate");
                }
            }
        }

        let results = finalize(matched, top_n);

        tracing::debug!(
            candidates = documents.len(),
            returned = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Model rerank completed"
        );

        Ok(results)
    }
}
