//! Catalog management: indexing, lookup and reset.

use crate::error::{AppError, Result};
use crate::ingestion::{tools_from_mcp, Tool};
use crate::pipeline::IndexReport;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    /// Tool definitions: `{name, description, args}` or
    /// `{ToolName, ToolDescription, Args}`.
    pub tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct McpIndexRequest {
    /// Server name prefixed to each tool description.
    pub server: String,
    /// A `tools/list` JSON-RPC response.
    pub response: Value,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

fn check_batch_size(state: &AppState, count: usize) -> Result<()> {
    if count == 0 {
        return Err(AppError::ValidationError(
            "Tool list cannot be empty".to_string(),
        ));
    }
    let max = state.config.max_tools_per_request;
    if count > max {
        return Err(AppError::ValidationError(format!(
            "Maximum {} tools per request",
            max
        )));
    }
    Ok(())
}

/// POST /tools - Index tool definitions.
///
/// Per-tool failures are reported in the response; the request itself only
/// fails on invalid input.
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexReport>> {
    check_batch_size(&state, request.tools.len())?;
    Ok(Json(state.pipeline.index_definitions(request.tools).await))
}

/// POST /tools/mcp - Index the tools of an MCP server.
pub async fn index_mcp_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<McpIndexRequest>,
) -> Result<Json<IndexReport>> {
    let definitions = tools_from_mcp(&request.response, &request.server)?;
    check_batch_size(&state, definitions.len())?;

    Ok(Json(state.pipeline.index_tool_definitions(definitions).await))
}

/// GET /tools/:id - Fetch a stored tool.
pub async fn get_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tool>> {
    state
        .pipeline
        .get_tool(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No tool with id {}", id)))
}

/// DELETE /tools - Remove every tool and slice.
pub async fn clear_handler(State(state): State<Arc<AppState>>) -> Result<Json<ClearResponse>> {
    let removed = state.pipeline.clear_all().await?;
    Ok(Json(ClearResponse { removed }))
}
