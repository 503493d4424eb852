use crate::error::{AppError, Result};
use ndarray::Array2;
use std::path::Path;
use tokenizers::Tokenizer;

/// Padded `(query, document)` encodings, one row per document.
#[derive(Debug)]
pub struct PairBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
}

impl PairBatch {
    pub fn rows(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Row-major buffers for tensor construction.
    pub fn into_flat(self) -> (Vec<i64>, Vec<i64>) {
        (
            self.input_ids.iter().copied().collect(),
            self.attention_mask.iter().copied().collect(),
        )
    }
}

pub struct PairTokenizer {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl PairTokenizer {
    pub fn load(tokenizer_path: &Path, max_length: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        tracing::info!(
            path = %tokenizer_path.display(),
            max_length,
            "Cross-encoder tokenizer loaded"
        );

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    /// Encode the query against every document. Rows are padded to the
    /// longest pair in the batch, capped at `max_length`.
    pub fn encode_pairs(&self, query: &str, documents: &[String]) -> Result<PairBatch> {
        if documents.is_empty() {
            return Err(AppError::ValidationError(
                "Documents list cannot be empty".to_string(),
            ));
        }

        let encodings = documents
            .iter()
            .map(|doc| {
                self.tokenizer
                    .encode((query, doc.as_str()), true)
                    .map_err(|e| AppError::TokenizationError(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let width = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(0);

        let mut input_ids = Array2::<i64>::zeros((documents.len(), width));
        let mut attention_mask = Array2::<i64>::zeros((documents.len(), width));

        for (row, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            for col in 0..ids.len().min(width) {
                input_ids[[row, col]] = ids[col] as i64;
                attention_mask[[row, col]] = mask[col] as i64;
            }
        }

        Ok(PairBatch {
            input_ids,
            attention_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_batch_flattens_row_major() {
        let batch = PairBatch {
            input_ids: Array2::from_shape_vec((2, 2), vec![1, 2, 3, 4]).unwrap(),
            attention_mask: Array2::from_shape_vec((2, 2), vec![1, 1, 1, 0]).unwrap(),
        };
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.seq_len(), 2);
        let (ids, mask) = batch.into_flat();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(mask, vec![1, 1, 1, 0]);
    }

    #[test]
    #[ignore = "requires tokenizer file at ./models/tokenizer.json"]
    fn test_encode_pairs_pads_to_longest() {
        let tokenizer = PairTokenizer::load(Path::new("./models/tokenizer.json"), 512).unwrap();
        let docs = vec!["short".to_string(), "a much longer document text".to_string()];
        let batch = tokenizer.encode_pairs("query", &docs).unwrap();
        assert_eq!(batch.rows(), 2);
        let (_, mask) = batch.into_flat();
        assert!(mask.contains(&0));
    }
}
