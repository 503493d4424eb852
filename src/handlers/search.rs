//! Tool discovery handler.
//!
//! Runs the retrieval funnel for a natural language query:
//!
//! 1. Embed the query and pull the `top_n` most similar slices
//! 2. Aggregate slice hits into tool scores and keep the best `top_m` tools
//! 3. Rerank those candidates and return the best `top_k`

use crate::config::FunnelWidths;
use crate::error::{AppError, Result};
use crate::rerank::RankedResult;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// The natural language query to match against tools
    pub query: String,
    /// Overrides of the configured funnel widths
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub top_m: Option<usize>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl SearchRequest {
    fn funnel(&self, defaults: FunnelWidths) -> FunnelWidths {
        FunnelWidths {
            top_n: self.top_n.unwrap_or(defaults.top_n),
            top_m: self.top_m.unwrap_or(defaults.top_m),
            top_k: self.top_k.unwrap_or(defaults.top_k),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    /// True when any result was scored with an unavailable term.
    pub degraded: bool,
    pub latency_ms: u64,
}

/// POST /search - Find tools relevant to a natural language query.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start_time = std::time::Instant::now();

    if request.query.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Query cannot be empty".to_string(),
        ));
    }

    let funnel = request.funnel(state.pipeline.funnel());
    let results = state.pipeline.search_with(&request.query, funnel).await?;
    let degraded = results.iter().any(|r| r.degraded);

    Ok(Json(SearchResponse {
        results,
        degraded,
        latency_ms: start_time.elapsed().as_millis() as u64,
    }))
}
