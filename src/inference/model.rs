use super::tokenize::PairBatch;
use crate::error::{AppError, Result};
use crossbeam::queue::ArrayQueue;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::cell::UnsafeCell;
use std::path::Path;

/// A pool of ONNX Runtime sessions for the cross-encoder relevance model.
///
/// `Session::run` needs `&mut self`. Each session index is handed out by a
/// lock-free queue to at most one caller at a time, so concurrent scoring
/// runs on separate sessions without a mutex.
pub struct CrossEncoderModel {
    sessions: Vec<UnsafeCell<Session>>,
    available: ArrayQueue<usize>,
}

/// Returns its session index to the pool when dropped.
struct Lease<'a> {
    pool: &'a CrossEncoderModel,
    index: usize,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        // Only indices taken from the queue come back, so it never overflows
        let _ = self.pool.available.push(self.index);
    }
}

impl CrossEncoderModel {
    /// Load `pool_size` sessions from one model file, each with Level3
    /// optimization and a single intra-op thread.
    pub fn load_pool(model_path: &Path, pool_size: usize) -> Result<Self> {
        let pool_size = pool_size.max(1);
        let model_bytes = std::fs::read(model_path).map_err(|e| {
            AppError::ModelError(format!(
                "Failed to read cross-encoder model {}: {}",
                model_path.display(),
                e
            ))
        })?;

        let mut sessions = Vec::with_capacity(pool_size);
        let available = ArrayQueue::new(pool_size);

        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .commit_from_memory(&model_bytes)
                .map_err(|e: ort::Error| AppError::ModelError(e.to_string()))?;

            sessions.push(UnsafeCell::new(session));
            available
                .push(i)
                .map_err(|_| AppError::ModelError("Failed to initialize session pool".into()))?;
        }

        tracing::info!(
            path = %model_path.display(),
            pool_size,
            "Cross-encoder session pool loaded"
        );

        Ok(Self {
            sessions,
            available,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.sessions.len()
    }

    fn lease(&self) -> Result<Lease<'_>> {
        let index = self
            .available
            .pop()
            .ok_or_else(|| AppError::ResourceError("No available cross-encoder sessions".into()))?;
        Ok(Lease { pool: self, index })
    }

    /// Raw relevance logits, one per row of `batch`.
    pub fn logits(&self, batch: PairBatch) -> Result<Vec<f32>> {
        let rows = batch.rows();
        let shape = [rows, batch.seq_len()];
        let (input_ids, attention_mask) = batch.into_flat();

        let input_ids = Tensor::from_array((shape, input_ids))?;
        let attention_mask = Tensor::from_array((shape, attention_mask))?;

        let lease = self.lease()?;
        // SAFETY: the lease holds this index exclusively until it is dropped,
        // and no other reference to the session exists meanwhile.
        let session = unsafe { &mut *self.sessions[lease.index].get() };

        // XLM-RoBERTa rerankers take no token_type_ids
        let outputs = session.run(ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
        ])?;

        let logits = outputs
            .get("logits")
            .ok_or_else(|| AppError::ModelError("No 'logits' output found".to_string()))?;
        let (_shape, data) = logits.try_extract_tensor::<f32>()?;

        if data.len() < rows {
            return Err(AppError::ModelError(format!(
                "Model returned {} logits for {} pairs",
                data.len(),
                rows
            )));
        }

        Ok(data.iter().take(rows).copied().collect())
    }
}

// SAFETY: every access to an `UnsafeCell<Session>` goes through a `Lease`,
// and the queue hands each index to one lease at a time. This gives the same
// exclusion as a mutex per session.
unsafe impl Send for CrossEncoderModel {}
unsafe impl Sync for CrossEncoderModel {}
