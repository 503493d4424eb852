use crate::config::Config;
use crate::embedding::{build_embedder, EmbeddingProvider};
use crate::error::Result;
use crate::persistence::Snapshot;
use crate::pipeline::Pipeline;
use crate::rerank::{build_reranker, Reranker};
use crate::search::build_index;
use crate::store::{MemoryRecordStore, MemoryVectorStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Application state shared across all request handlers.
///
/// External clients (embedder, reranker, stores) are built once here and
/// handed to the pipeline; nothing is process-global.
pub struct AppState {
    pub pipeline: Pipeline,
    pub records: Arc<MemoryRecordStore>,
    pub vectors: Arc<MemoryVectorStore>,
    pub embedding_dim: usize,
    /// Set once the stores are loaded and the reranker is warmed up.
    pub ready: AtomicBool,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build every collaborator from configuration and restore the snapshot
    /// if one is configured.
    pub async fn new(config: Config) -> Result<Self> {
        let embedder = build_embedder(&config)?;
        let reranker = build_reranker(&config, Arc::clone(&embedder))?;
        let state = Self::from_parts(config, embedder, reranker)?;

        state.restore_snapshot().await;
        state.mark_ready();

        Ok(state)
    }

    /// Assemble state around already-built clients. The result is not marked
    /// ready.
    pub fn from_parts(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
    ) -> Result<Self> {
        let embedding_dim = embedder.dimensions();
        let records = Arc::new(MemoryRecordStore::new());
        let vectors = Arc::new(MemoryVectorStore::new(build_index(
            config.vector_backend,
            embedding_dim,
        )));

        let pipeline = Pipeline::new(
            embedder,
            records.clone(),
            vectors.clone(),
            reranker,
            config.funnel,
            config.index_concurrency,
        )?;

        Ok(Self {
            pipeline,
            records,
            vectors,
            embedding_dim,
            ready: AtomicBool::new(false),
            config: Arc::new(config),
        })
    }

    /// Load the configured snapshot. A missing, invalid or incompatible
    /// snapshot leaves the stores empty.
    async fn restore_snapshot(&self) {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return;
        };

        let outcome = match Snapshot::load(path) {
            Ok(Some(snapshot)) => {
                snapshot
                    .restore(self.records.as_ref(), &self.vectors, self.embedding_dim)
                    .await
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            tracing::warn!(path = %path.display(), error = %e, "Snapshot not restored, starting empty");
        }
    }

    /// Write the stores to the configured snapshot path, if any.
    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(());
        };

        Snapshot::capture(self.records.as_ref(), &self.vectors, self.embedding_dim)
            .await?
            .save(path)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Check if the service is ready to handle requests.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
