//! Ingestion of tool definitions.
//!
//! Tool definitions arrive either as plain records or as MCP `list_tools`
//! responses, and are cut into embedded slices for the vector store.

pub mod mcp;
pub mod slicer;
pub mod types;

pub use mcp::tools_from_mcp;
pub use slicer::{SliceBatch, SliceFailure, Slicer};
pub use types::{SliceKind, Tool, ToolArg, ToolDefinition, ToolSlice};
