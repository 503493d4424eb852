use crate::error::{AppError, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Which embedding provider backs slicing, query embedding and the
/// lexical reranker's vector term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
    /// Local bi-encoder ONNX model.
    Onnx,
    /// Deterministic feature hashing. Needs no network or model files.
    Hashing,
}

impl EmbeddingBackend {
    pub fn from_env() -> Self {
        match env::var("EMBEDDING_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "http" | "remote" | "openai" => Self::Http,
            "onnx" | "local" | "bi-encoder" => Self::Onnx,
            "hashing" | "hash" | "offline" => Self::Hashing,
            _ if env::var("EMBEDDING_BASE_URL").is_ok() => Self::Http,
            _ => Self::Hashing,
        }
    }
}

/// Reranker variant used for the final stage of the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankStrategy {
    /// Cross-encoder relevance model.
    Model,
    /// Keyword overlap blended with embedding cosine similarity.
    Lexical,
}

impl RerankStrategy {
    pub fn from_env() -> Self {
        match env::var("RERANK_STRATEGY")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "model" | "cross-encoder" | "cross_encoder" => Self::Model,
            _ => Self::Lexical,
        }
    }
}

/// Similarity search backend behind the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    /// Exact scan over every stored slice.
    Linear,
    /// Approximate nearest neighbours over an HNSW graph.
    Hnsw,
}

impl VectorBackend {
    pub fn from_env() -> Self {
        match env::var("VECTOR_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hnsw" | "ann" => Self::Hnsw,
            _ => Self::Linear,
        }
    }
}

/// Result-set widths of the three retrieval stages.
///
/// `top_n` slices are pulled from similarity search, `top_m` tools survive
/// coarse ranking and at most `top_k` tools come out of the reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FunnelWidths {
    pub top_n: usize,
    pub top_m: usize,
    pub top_k: usize,
}

impl Default for FunnelWidths {
    fn default() -> Self {
        Self {
            top_n: 100,
            top_m: 20,
            top_k: 5,
        }
    }
}

impl FunnelWidths {
    pub fn new(top_n: usize, top_m: usize, top_k: usize) -> Self {
        Self { top_n, top_m, top_k }
    }

    /// Reject funnels that would silently truncate or empty a stage.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(AppError::ConfigError("top_k must be at least 1".to_string()));
        }
        if self.top_m < self.top_k {
            return Err(AppError::ConfigError(format!(
                "top_m ({}) must be >= top_k ({})",
                self.top_m, self.top_k
            )));
        }
        if self.top_n < self.top_m {
            return Err(AppError::ConfigError(format!(
                "top_n ({}) must be >= top_m ({})",
                self.top_n, self.top_m
            )));
        }
        Ok(())
    }
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub embedding_backend: EmbeddingBackend,
    /// Base URL of the OpenAI-compatible embedding service.
    pub embedding_base_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Largest number of texts the embedding provider accepts per call.
    pub embedding_batch_size: usize,
    /// Path to bi-encoder ONNX model (EMBEDDING_BACKEND=onnx).
    pub bi_encoder_model_path: PathBuf,
    /// Path to bi-encoder tokenizer.
    pub bi_encoder_tokenizer_path: PathBuf,
    pub rerank_strategy: RerankStrategy,
    /// Cross-encoder ONNX model (RERANK_STRATEGY=model).
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub max_sequence_length: usize,
    /// Batch size for internal chunking during cross-encoder inference.
    pub batch_size: usize,
    /// Optional override for the cross-encoder session pool size.
    /// If None, uses available parallelism.
    pub pool_size: Option<usize>,
    pub vector_backend: VectorBackend,
    pub funnel: FunnelWidths,
    /// Maximum number of tools indexed concurrently.
    pub index_concurrency: usize,
    /// Timeout applied to each call into an external collaborator.
    pub external_timeout_secs: u64,
    /// Maximum tool definitions accepted by a single index request.
    pub max_tools_per_request: usize,
    /// Where the store snapshot is loaded from at startup and written at shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 30,
            embedding_backend: EmbeddingBackend::Hashing,
            embedding_base_url: None,
            embedding_api_key: None,
            embedding_model: "text-embedding-v3".to_string(),
            embedding_dim: 1024,
            embedding_batch_size: 10,
            bi_encoder_model_path: PathBuf::from("./bi-encoder-model/model_int8.onnx"),
            bi_encoder_tokenizer_path: PathBuf::from("./bi-encoder-model/tokenizer.json"),
            rerank_strategy: RerankStrategy::Lexical,
            model_path: PathBuf::from("./models/model_int8.onnx"),
            tokenizer_path: PathBuf::from("./models/tokenizer.json"),
            max_sequence_length: 1024,
            batch_size: 32,
            pool_size: None,
            vector_backend: VectorBackend::Linear,
            funnel: FunnelWidths::default(),
            index_concurrency: 4,
            external_timeout_secs: 30,
            max_tools_per_request: 10_000,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Backend selectors:
    /// - `EMBEDDING_BACKEND`: `http` / `onnx` / `hashing` (defaults to `http`
    ///   when `EMBEDDING_BASE_URL` is set, `hashing` otherwise)
    /// - `RERANK_STRATEGY`: `model` / `lexical` (default)
    /// - `VECTOR_BACKEND`: `linear` (default) / `hnsw`
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let funnel = FunnelWidths {
            top_n: env::var("TOP_N")
                .unwrap_or_else(|_| defaults.funnel.top_n.to_string())
                .parse()?,
            top_m: env::var("TOP_M")
                .unwrap_or_else(|_| defaults.funnel.top_m.to_string())
                .parse()?,
            top_k: env::var("TOP_K")
                .unwrap_or_else(|_| defaults.funnel.top_k.to_string())
                .parse()?,
        };
        funnel.validate()?;

        let config = Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            embedding_backend: EmbeddingBackend::from_env(),
            embedding_base_url: env::var("EMBEDDING_BASE_URL").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dim: env::var("EMBEDDING_DIM")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()?,
            embedding_batch_size: env::var("EMBEDDING_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            bi_encoder_model_path: env::var("BI_ENCODER_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bi_encoder_model_path),
            bi_encoder_tokenizer_path: env::var("BI_ENCODER_TOKENIZER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bi_encoder_tokenizer_path),
            rerank_strategy: RerankStrategy::from_env(),
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            tokenizer_path: env::var("TOKENIZER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.tokenizer_path),
            max_sequence_length: env::var("MAX_SEQ_LENGTH")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()?,
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "32".to_string())
                .parse()?,
            pool_size: env::var("POOL_SIZE").ok().and_then(|s| s.parse().ok()),
            vector_backend: VectorBackend::from_env(),
            funnel,
            index_concurrency: env::var("INDEX_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            external_timeout_secs: env::var("EXTERNAL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            max_tools_per_request: env::var("MAX_TOOLS_PER_REQUEST")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
        };

        if config.embedding_backend == EmbeddingBackend::Http
            && config.embedding_base_url.is_none()
        {
            anyhow::bail!("EMBEDDING_BACKEND=http requires EMBEDDING_BASE_URL");
        }
        if config.embedding_batch_size == 0 {
            anyhow::bail!("EMBEDDING_BATCH_SIZE must be at least 1");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_funnel_is_valid() {
        assert!(FunnelWidths::default().validate().is_ok());
    }

    #[test]
    fn test_funnel_rejects_inverted_widths() {
        assert!(FunnelWidths::new(10, 20, 5).validate().is_err());
        assert!(FunnelWidths::new(100, 3, 5).validate().is_err());
    }

    #[test]
    fn test_funnel_rejects_zero_top_k() {
        let err = FunnelWidths::new(10, 5, 0).validate().unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_funnel_accepts_equal_widths() {
        assert!(FunnelWidths::new(3, 3, 3).validate().is_ok());
    }
}
