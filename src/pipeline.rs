//! The retrieval funnel.
//!
//! Indexing: parse -> store record -> slice and embed -> store slices.
//! Search: embed query -> slice search (`top_n`) -> coarse rank (`top_m`)
//! -> fetch records -> rerank (`top_k`).

use crate::config::FunnelWidths;
use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::{AppError, Result};
use crate::ingestion::{Slicer, Tool, ToolDefinition};
use crate::rerank::{RankedResult, Reranker};
use crate::search::CoarseRanker;
use crate::store::{self, RecordStore, VectorStore, TOOL_PREFIX};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type ToolLocks = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

/// Exclusive right to write one tool's record and slices.
///
/// Dropping the lease releases the tool and forgets its lock once nobody
/// else is waiting on it.
struct ToolLease<'a> {
    locks: &'a ToolLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> ToolLease<'a> {
    async fn acquire(locks: &'a ToolLocks, id: Uuid) -> ToolLease<'a> {
        let lock = Arc::clone(locks.lock().entry(id).or_default());
        let guard = lock.lock_owned().await;
        ToolLease {
            locks,
            id,
            guard: Some(guard),
        }
    }
}

impl Drop for ToolLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks.get(&self.id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.id);
        }
    }
}

/// A tool that could not be indexed.
#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    /// Position of the tool in the submitted batch.
    pub index: usize,
    pub name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Ids of indexed tools, in submission order.
    pub indexed: Vec<Uuid>,
    pub failures: Vec<IndexFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub tools: usize,
    pub slices: usize,
    pub embedding_provider: String,
    pub embedding_dimensions: usize,
    pub vector_backend: String,
    pub reranker: String,
    pub funnel: FunnelStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStats {
    pub top_n: usize,
    pub top_m: usize,
    pub top_k: usize,
}

pub struct Pipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    slicer: Slicer,
    records: Arc<dyn RecordStore>,
    vectors: Arc<dyn VectorStore>,
    coarse: CoarseRanker,
    reranker: Arc<dyn Reranker>,
    funnel: FunnelWidths,
    index_concurrency: usize,
    tool_locks: ToolLocks,
}

impl Pipeline {
    /// Wire the funnel from its collaborators. Fails when the funnel widths
    /// are not ordered `top_n >= top_m >= top_k >= 1`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        records: Arc<dyn RecordStore>,
        vectors: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        funnel: FunnelWidths,
        index_concurrency: usize,
    ) -> Result<Self> {
        funnel.validate()?;

        Ok(Self {
            slicer: Slicer::new(Arc::clone(&embedder)),
            embedder,
            records,
            vectors,
            coarse: CoarseRanker::new(),
            reranker,
            funnel,
            index_concurrency: index_concurrency.max(1),
            tool_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn funnel(&self) -> FunnelWidths {
        self.funnel
    }

    /// Index one tool, replacing any previous version with the same id.
    ///
    /// If slicing or storing the slices fails, the tool's record and slices
    /// are removed so no stale version stays searchable. Writes to the same
    /// id run one at a time, in the order they asked for the tool.
    pub async fn index_tool(&self, tool: &Tool) -> Result<()> {
        let _lease = ToolLease::acquire(&self.tool_locks, tool.id).await;

        store::put_tool(self.records.as_ref(), tool).await?;

        let stored = match self.slicer.embed_slices(tool).await {
            Ok(slices) => self.vectors.replace_slices(tool.id, slices).await,
            Err(e) => Err(e),
        };

        if let Err(e) = stored {
            self.discard(&tool.id).await;
            return Err(e);
        }

        Ok(())
    }

    async fn discard(&self, id: &Uuid) {
        if let Err(e) = self.vectors.remove_tool(*id).await {
            tracing::warn!(tool_id = %id, error = %e, "Failed to remove slices of failed tool");
        }
        if let Err(e) = self.records.delete(&store::tool_key(id)).await {
            tracing::warn!(tool_id = %id, error = %e, "Failed to remove record of failed tool");
        }
    }

    /// Index a batch. Tools are processed independently with bounded
    /// concurrency; failures are collected per tool. Repeated ids are applied
    /// in batch order, so the last definition wins.
    pub async fn index_tools(&self, tools: Vec<Tool>) -> IndexReport {
        let start = Instant::now();
        let total = tools.len();
        metrics::counter!("index_requests_total").increment(1);

        let outcomes: Vec<(usize, Tool, Result<()>)> = stream::iter(tools.into_iter().enumerate())
            .map(|(index, tool)| async move {
                let outcome = self.index_tool(&tool).await;
                (index, tool, outcome)
            })
            .buffered(self.index_concurrency)
            .collect()
            .await;

        let mut report = IndexReport::default();
        for (index, tool, outcome) in outcomes {
            match outcome {
                Ok(()) => report.indexed.push(tool.id),
                Err(e) => {
                    tracing::warn!(index, tool = %tool.name, error = %e, "Tool indexing failed");
                    report.failures.push(IndexFailure {
                        index,
                        name: Some(tool.name),
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::counter!("indexed_tools_total").increment(report.indexed.len() as u64);
        metrics::counter!("index_failures_total").increment(report.failures.len() as u64);

        tracing::info!(
            tools = total,
            indexed = report.indexed.len(),
            failed = report.failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Indexing complete"
        );

        report
    }

    /// Parse raw JSON definitions and index the valid ones. A value that does
    /// not parse is a failure of that item only.
    pub async fn index_definitions(&self, values: Vec<serde_json::Value>) -> IndexReport {
        let candidates = values
            .into_iter()
            .map(|value| {
                let name = value
                    .get("name")
                    .or_else(|| value.get("ToolName"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                let parsed = serde_json::from_value::<ToolDefinition>(value)
                    .map_err(|e| {
                        AppError::ValidationError(format!("Malformed tool definition: {}", e))
                    })
                    .and_then(Tool::from_definition);

                (name, parsed)
            })
            .collect();

        self.index_candidates(candidates).await
    }

    /// Index already-decoded definitions, such as those read from an MCP
    /// server. An invalid definition is a failure of that item only.
    pub async fn index_tool_definitions(&self, definitions: Vec<ToolDefinition>) -> IndexReport {
        let candidates = definitions
            .into_iter()
            .map(|definition| {
                let name = Some(definition.name.clone());
                (name, Tool::from_definition(definition))
            })
            .collect();

        self.index_candidates(candidates).await
    }

    async fn index_candidates(&self, candidates: Vec<(Option<String>, Result<Tool>)>) -> IndexReport {
        let mut positions = Vec::with_capacity(candidates.len());
        let mut tools = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();

        for (index, (name, parsed)) in candidates.into_iter().enumerate() {
            match parsed {
                Ok(tool) => {
                    positions.push(index);
                    tools.push(tool);
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping invalid tool definition");
                    rejected.push(IndexFailure {
                        index,
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut report = self.index_tools(tools).await;
        for failure in &mut report.failures {
            failure.index = positions[failure.index];
        }
        metrics::counter!("index_failures_total").increment(rejected.len() as u64);
        report.failures.extend(rejected);
        report.failures.sort_by_key(|f| f.index);

        report
    }

    /// Run the funnel with the configured widths.
    pub async fn search(&self, query: &str) -> Result<Vec<RankedResult>> {
        self.search_with(query, self.funnel).await
    }

    /// Run the funnel with explicit widths.
    pub async fn search_with(&self, query: &str, funnel: FunnelWidths) -> Result<Vec<RankedResult>> {
        funnel.validate()?;
        let start = Instant::now();
        metrics::counter!("search_requests_total").increment(1);

        let query_vector = embed_one(self.embedder.as_ref(), query).await?;

        let hits = self.vectors.query(&query_vector, funnel.top_n).await?;
        if hits.is_empty() {
            tracing::debug!("No slice matched the query");
            return Ok(Vec::new());
        }

        let scores = self.coarse.rank(&hits);
        let candidate_ids = self.coarse.select_candidates(&scores, funnel.top_m);
        let candidates = store::get_tools(self.records.as_ref(), &candidate_ids).await?;

        let results = self
            .reranker
            .rerank(query, candidates, funnel.top_k)
            .await?;

        let elapsed = start.elapsed();
        metrics::histogram!("search_latency_ms").record(elapsed.as_secs_f64() * 1000.0);
        tracing::info!(
            hits = hits.len(),
            candidates = candidate_ids.len(),
            results = results.len(),
            reranker = self.reranker.name(),
            duration_ms = elapsed.as_millis() as u64,
            "Search complete"
        );

        Ok(results)
    }

    /// Search and return only the tools, best first.
    pub async fn search_tools(&self, query: &str) -> Result<Vec<Tool>> {
        Ok(self
            .search(query)
            .await?
            .into_iter()
            .map(|r| r.tool)
            .collect())
    }

    pub async fn get_tool(&self, id: &Uuid) -> Result<Option<Tool>> {
        store::get_tool(self.records.as_ref(), id).await
    }

    /// Delete every tool record and slice, then recreate an empty index.
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self.records.delete_prefix(TOOL_PREFIX).await?;
        self.vectors.drop_index().await?;
        self.vectors.recreate_index().await?;
        tracing::info!(removed, "All tool data cleared");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            tools: self.records.keys(TOOL_PREFIX).await?.len(),
            slices: self.vectors.slice_count().await?,
            embedding_provider: self.embedder.name().to_string(),
            embedding_dimensions: self.embedder.dimensions(),
            vector_backend: self.vectors.backend().to_string(),
            reranker: self.reranker.name().to_string(),
            funnel: FunnelStats {
                top_n: self.funnel.top_n,
                top_m: self.funnel.top_m,
                top_k: self.funnel.top_k,
            },
        })
    }
}
