//! Persistence boundaries: a key-value store for full tool records and a
//! vector store for slice embeddings.
//!
//! Both are async traits so networked backends can replace the in-memory
//! ones without touching the pipeline. Everything a tool owns lives under
//! keys scoped to its own id, so concurrent indexing of different tools
//! never touches shared entries.

pub mod memory;

pub use memory::{MemoryRecordStore, MemoryVectorStore};

use crate::error::{AppError, Result};
use crate::ingestion::{Tool, ToolSlice};
use crate::search::SliceHit;
use async_trait::async_trait;
use uuid::Uuid;

/// Key prefix of full tool records.
pub const TOOL_PREFIX: &str = "tool:";

/// Key prefix of slice entries.
pub const SLICE_PREFIX: &str = "tool_slices:";

pub fn tool_key(id: &Uuid) -> String {
    format!("{}{}", TOOL_PREFIX, id)
}

pub fn slice_key(owner: &Uuid, position: usize) -> String {
    format!("{}{}:{}", SLICE_PREFIX, owner, position)
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, value: String) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`, returning how many.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name of the similarity index.
    fn backend(&self) -> &'static str;

    /// Replace the whole slice set of `tool_id` in one step. Readers see
    /// either the old set or the new one, never a mix.
    async fn replace_slices(&self, tool_id: Uuid, slices: Vec<ToolSlice>) -> Result<()>;

    /// Drop every slice of `tool_id`, returning how many were removed.
    async fn remove_tool(&self, tool_id: Uuid) -> Result<usize>;

    /// The `limit` slices most similar to `vector`, best first.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SliceHit>>;

    async fn slice_count(&self) -> Result<usize>;

    /// Remove every slice and the index structure holding them.
    async fn drop_index(&self) -> Result<()>;

    /// Rebuild the index structure from the slices currently stored.
    async fn recreate_index(&self) -> Result<()>;
}

/// Store the full record of a tool under `tool:{id}`.
pub async fn put_tool(store: &dyn RecordStore, tool: &Tool) -> Result<()> {
    let json = serde_json::to_string_pretty(tool)
        .map_err(|e| AppError::StoreError(format!("Failed to serialize tool: {}", e)))?;
    store.put(&tool_key(&tool.id), json).await
}

/// Fetch and decode a tool record. A record that no longer decodes is
/// reported as a store error.
pub async fn get_tool(store: &dyn RecordStore, id: &Uuid) -> Result<Option<Tool>> {
    let Some(json) = store.get(&tool_key(id)).await? else {
        return Ok(None);
    };

    let mut tool: Tool = serde_json::from_str(&json)
        .map_err(|e| AppError::StoreError(format!("Corrupt tool record {}: {}", id, e)))?;
    tool.id = *id;
    Ok(Some(tool))
}

/// Fetch several tools in the order given, skipping ids with no record.
pub async fn get_tools(store: &dyn RecordStore, ids: &[Uuid]) -> Result<Vec<Tool>> {
    let mut tools = Vec::with_capacity(ids.len());
    for id in ids {
        match get_tool(store, id).await? {
            Some(tool) => tools.push(tool),
            None => {
                tracing::warn!(tool_id = %id, "Slice references a missing tool record, skipping");
            }
        }
    }
    Ok(tools)
}

/// Every stored tool, ordered by key.
pub async fn list_tools(store: &dyn RecordStore) -> Result<Vec<Tool>> {
    let mut tools = Vec::new();
    for key in store.keys(TOOL_PREFIX).await? {
        let Some(id) = key
            .strip_prefix(TOOL_PREFIX)
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            continue;
        };
        if let Some(tool) = get_tool(store, &id).await? {
            tools.push(tool);
        }
    }
    Ok(tools)
}
