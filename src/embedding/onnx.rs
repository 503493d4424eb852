//! Local bi-encoder embedding provider.
//!
//! Encodes texts independently with an ONNX sentence-embedding model (mean
//! pooling over non-padding tokens, L2-normalised), so slice vectors and
//! query vectors live in the same space.

use super::{check_batch, check_output, EmbeddingProvider};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokenizers::Tokenizer;

struct BiEncoder {
    /// `Session::run` needs `&mut self`.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
}

pub struct OnnxEmbedder {
    inner: Arc<BiEncoder>,
    dimensions: usize,
    max_batch_size: usize,
    timeout: Duration,
}

impl OnnxEmbedder {
    /// Load bi-encoder model and tokenizer.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `tokenizer_path` - Path to the tokenizer JSON file
    /// * `max_length` - Maximum sequence length (512 for BGE-style models)
    /// * `dimensions` - Expected hidden size; checked on every batch
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        dimensions: usize,
        max_batch_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::ModelError(format!("Failed to load bi-encoder tokenizer: {}", e))
        })?;

        let session = Session::builder()
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| AppError::ModelError(format!("Failed to load bi-encoder model: {}", e)))?;

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            max_length,
            dimensions,
            "Bi-encoder model loaded"
        );

        Ok(Self {
            inner: Arc::new(BiEncoder {
                session: Mutex::new(session),
                tokenizer,
                max_length,
            }),
            dimensions,
            max_batch_size,
            timeout,
        })
    }
}

impl BiEncoder {
    /// Encode a batch of texts into embedding vectors.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        let batch_size = encodings.len();

        // Longest sequence in this batch, capped at max_length
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let shape = [batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| AppError::ModelError(format!("Bi-encoder inference failed: {}", e)))?;

        // last_hidden_state: (batch, seq_len, hidden_size)
        let hidden_state = outputs.get("last_hidden_state").ok_or_else(|| {
            AppError::ModelError("No 'last_hidden_state' output found".to_string())
        })?;

        let (shape_info, data) = hidden_state
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let hidden_size = shape_info[2] as usize;

        Ok(mean_pool(data, &attention_mask, max_len, hidden_size))
    }
}

/// Average the hidden states of unmasked tokens per row, then L2-normalise.
///
/// `hidden` is row-major `(rows, seq_len, hidden_size)`; `mask` is
/// `(rows, seq_len)`. Rows with no unmasked tokens stay zero.
fn mean_pool(hidden: &[f32], mask: &[i64], seq_len: usize, hidden_size: usize) -> Vec<Vec<f32>> {
    mask.chunks(seq_len)
        .zip(hidden.chunks(seq_len * hidden_size))
        .map(|(row_mask, row_hidden)| {
            let mut pooled = vec![0.0f32; hidden_size];
            let mut tokens = 0usize;

            for (token, _) in row_mask.iter().enumerate().filter(|(_, m)| **m == 1) {
                let state = &row_hidden[token * hidden_size..(token + 1) * hidden_size];
                pooled.iter_mut().zip(state).for_each(|(acc, v)| *acc += v);
                tokens += 1;
            }

            if tokens > 0 {
                pooled.iter_mut().for_each(|v| *v /= tokens as f32);
            }
            let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                pooled.iter_mut().for_each(|v| *v /= norm);
            }
            pooled
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    fn name(&self) -> &str {
        "onnx"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch(self.name(), self.max_batch_size, texts)?;

        let encoder = Arc::clone(&self.inner);
        let owned = texts.to_vec();

        // CPU-bound work runs on the blocking pool, bounded by the timeout
        let vectors = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || encoder.encode_batch(&owned)),
        )
        .await
        .map_err(|_| {
            AppError::ResourceError(format!(
                "Bi-encoder timeout exceeded ({}s)",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::ModelError(format!("Task join error: {}", e)))??;

        check_output(self.name(), self.dimensions, texts.len(), &vectors)?;
        Ok(vectors)
    }
}
