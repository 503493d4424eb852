//! ONNX cross-encoder inference: pooled sessions and pair tokenization.

pub mod model;
pub mod tokenize;

pub use model::CrossEncoderModel;
pub use tokenize::{PairBatch, PairTokenizer};
