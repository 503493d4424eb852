pub mod health;
pub mod search;
pub mod tools;

pub use health::{health_handler, ready_handler, stats_handler};
pub use search::search_handler;
pub use tools::{clear_handler, get_tool_handler, index_handler, index_mcp_handler};

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Every API route except `/metrics`, bound to `state`.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Index requests carry whole catalogs
        .route(
            "/tools",
            post(index_handler)
                .delete(clear_handler)
                .layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route(
            "/tools/mcp",
            post(index_mcp_handler).layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route("/tools/:id", get(get_tool_handler))
        .route("/search", post(search_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}
