//! Toolsift - tool retrieval for LLM function calling
//!
//! Tools are cut into overview and parameter slices and embedded. A query
//! runs through a three-stage funnel: slice-level similarity search, coarse
//! per-tool aggregation and a final rerank of the shortlist.

pub mod config;
pub mod embedding;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod ingestion;
pub mod persistence;
pub mod pipeline;
pub mod rerank;
pub mod search;
pub mod state;
pub mod store;
pub mod text;

// Re-export key types for convenience
pub use config::{Config, FunnelWidths};
pub use error::{AppError, Result};
pub use handlers::api_router;
pub use ingestion::{Tool, ToolArg, ToolDefinition};
pub use pipeline::{IndexReport, Pipeline};
pub use rerank::RankedResult;
pub use state::AppState;
