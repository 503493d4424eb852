//! Embedding providers.
//!
//! Every provider maps a bounded batch of texts to fixed-dimensionality
//! vectors in input order. Callers with more texts than a provider's batch
//! limit go through [`embed_chunked`].

pub mod hashing;
pub mod http;
pub mod onnx;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
pub use onnx::OnnxEmbedder;

use crate::config::{Config, EmbeddingBackend};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name for logs and stats.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Largest batch accepted by a single [`embed`](Self::embed) call.
    fn max_batch_size(&self) -> usize;

    /// Embed at most `max_batch_size()` texts, preserving input order.
    ///
    /// Fails with `AppError::EmbeddingError` when given more texts than the
    /// batch limit or when the backend fails.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Reject batches over the provider limit before any work is done.
pub(crate) fn check_batch(name: &str, max_batch_size: usize, texts: &[String]) -> Result<()> {
    if texts.len() > max_batch_size {
        return Err(AppError::EmbeddingError(format!(
            "{} accepts at most {} texts per call, got {}",
            name,
            max_batch_size,
            texts.len()
        )));
    }
    Ok(())
}

/// Verify a provider returned one vector of the right size per input.
pub(crate) fn check_output(
    name: &str,
    dimensions: usize,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected {
        return Err(AppError::EmbeddingError(format!(
            "{} returned {} vectors for {} texts",
            name,
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(AppError::EmbeddingError(format!(
            "{} returned a {}-dim vector, expected {}",
            name,
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

/// Embed any number of texts by splitting them into provider-sized batches.
///
/// Results are concatenated in input order. The first failing batch aborts
/// the whole call; no partial output is returned.
pub async fn embed_chunked(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let limit = provider.max_batch_size().max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(limit) {
        let batch = provider.embed(chunk).await?;
        check_output(provider.name(), provider.dimensions(), chunk.len(), &batch)?;
        vectors.extend(batch);
    }

    Ok(vectors)
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let mut vectors = provider.embed(&texts).await?;
    check_output(provider.name(), provider.dimensions(), 1, &vectors)?;
    vectors
        .pop()
        .ok_or_else(|| AppError::EmbeddingError("Empty embedding response".to_string()))
}

/// Construct the provider selected by configuration.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_secs(config.external_timeout_secs);

    let provider: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
        EmbeddingBackend::Http => {
            let base_url = config.embedding_base_url.as_deref().ok_or_else(|| {
                AppError::ConfigError("EMBEDDING_BASE_URL is not set".to_string())
            })?;
            Arc::new(HttpEmbedder::new(
                base_url,
                config.embedding_api_key.clone(),
                &config.embedding_model,
                config.embedding_dim,
                config.embedding_batch_size,
                timeout,
            )?)
        }
        EmbeddingBackend::Onnx => Arc::new(OnnxEmbedder::load(
            &config.bi_encoder_model_path,
            &config.bi_encoder_tokenizer_path,
            config.max_sequence_length.min(512),
            config.embedding_dim,
            config.embedding_batch_size,
            timeout,
        )?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(
            config.embedding_dim,
            config.embedding_batch_size,
        )),
    };

    tracing::info!(
        provider = provider.name(),
        dimensions = provider.dimensions(),
        max_batch_size = provider.max_batch_size(),
        "Embedding provider ready"
    );

    Ok(provider)
}
