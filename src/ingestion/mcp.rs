//! Conversion of MCP `list_tools` responses into indexable tool definitions.
//!
//! Each entry of `result.tools` becomes a [`ToolDefinition`]; every property of
//! its `inputSchema` becomes one argument. Property order follows the JSON
//! object order as parsed (sorted by key), which keeps slicing deterministic.

use crate::error::{AppError, Result};
use crate::ingestion::types::{ToolArg, ToolDefinition};
use serde_json::Value;
use std::collections::HashSet;

/// Maximum description length before truncation
const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Transform an MCP list_tools JSON-RPC response into tool definitions.
///
/// # Arguments
/// * `json` - The full JSON-RPC response (must contain `result.tools` array)
/// * `server_name` - The origin MCP server name, prepended to descriptions
///
/// # Errors
/// Returns `AppError::IngestionError` if the JSON is not a valid MCP response
/// or if every tool in a non-empty list is malformed. Individual malformed
/// tools are logged and skipped.
pub fn tools_from_mcp(json: &Value, server_name: &str) -> Result<Vec<ToolDefinition>> {
    let tools_array = extract_tools_array(json)?;

    let mut results = Vec::with_capacity(tools_array.len());

    for (idx, tool_value) in tools_array.iter().enumerate() {
        match normalize_tool(tool_value, server_name) {
            Ok(tool) => results.push(tool),
            Err(e) => {
                tracing::warn!(
                    index = idx,
                    error = %e,
                    "Skipping malformed tool definition"
                );
            }
        }
    }

    if results.is_empty() && !tools_array.is_empty() {
        return Err(AppError::IngestionError(
            "All tool definitions failed to parse".into(),
        ));
    }

    tracing::debug!(
        total = tools_array.len(),
        parsed = results.len(),
        server = server_name,
        "MCP tool conversion complete"
    );

    Ok(results)
}

/// Navigates the path: root -> result -> tools
fn extract_tools_array(json: &Value) -> Result<&Vec<Value>> {
    json.get("result")
        .and_then(|r| r.get("tools"))
        .and_then(|t| t.as_array())
        .ok_or_else(|| {
            AppError::IngestionError("Expected 'result.tools' array in MCP response".into())
        })
}

fn normalize_tool(tool_value: &Value, server_name: &str) -> Result<ToolDefinition> {
    let name = tool_value
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            AppError::IngestionError(format!(
                "Tool missing required 'name' field: {:?}",
                tool_value.get("name")
            ))
        })?;

    let description = tool_value
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let description = match (server_name.is_empty(), description.is_empty()) {
        (true, _) => truncate_description(description),
        (false, true) => format!("[{}]", server_name),
        (false, false) => format!("[{}] {}", server_name, truncate_description(description)),
    };

    Ok(ToolDefinition {
        id: None,
        name: name.to_string(),
        description,
        args: schema_args(tool_value.get("inputSchema")),
    })
}

/// Truncate description to MAX_DESCRIPTION_LENGTH characters with ellipsis.
///
/// Attempts to truncate at a word boundary when possible.
fn truncate_description(desc: &str) -> String {
    let Some((cut, _)) = desc.char_indices().nth(MAX_DESCRIPTION_LENGTH) else {
        return desc.to_string();
    };

    let truncated = &desc[..cut];

    match truncated.rfind(' ') {
        Some(pos) if truncated[..pos].chars().count() > MAX_DESCRIPTION_LENGTH - 50 => {
            format!("{}...", &truncated[..pos])
        }
        _ => format!("{}...", truncated),
    }
}

/// One argument per `inputSchema.properties` entry.
///
/// The argument description is the property's own description, or its JSON
/// type when none is given; required properties are prefixed with
/// `(required)`.
fn schema_args(input_schema: Option<&Value>) -> Vec<ToolArg> {
    let Some(properties) = input_schema
        .and_then(|s| s.get("properties"))
        .and_then(|p| p.as_object())
    else {
        return Vec::new();
    };

    let required: HashSet<&str> = input_schema
        .and_then(|s| s.get("required"))
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let param_type = prop.get("type").and_then(|t| t.as_str()).unwrap_or("any");
            let text = prop
                .get("description")
                .and_then(|d| d.as_str())
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} value", param_type));

            let description = if required.contains(name.as_str()) {
                format!("(required) {}", text)
            } else {
                text
            };

            ToolArg::new(name.clone(), description)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_valid_mcp_response() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [{
                    "name": "lookup_quote",
                    "description": "Latest quote for a ticker.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "ticker": { "type": "string", "description": "Exchange symbol" },
                            "venue": { "type": "string" }
                        },
                        "required": ["ticker"]
                    }
                }]
            }
        });

        let tools = tools_from_mcp(&response, "markets").unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "lookup_quote");
        assert_eq!(tools[0].description, "[markets] Latest quote for a ticker.");
        assert_eq!(tools[0].args.len(), 2);
        assert_eq!(tools[0].args[0], ToolArg::new("ticker", "(required) Exchange symbol"));
        assert_eq!(tools[0].args[1], ToolArg::new("venue", "string value"));
    }

    #[test]
    fn test_missing_result_returns_error() {
        let response = json!({ "jsonrpc": "2.0", "id": 7, "error": { "code": -32601 } });
        assert!(tools_from_mcp(&response, "server").is_err());
    }

    #[test]
    fn test_null_description_keeps_server_tag() {
        let response = json!({
            "result": {
                "tools": [{
                    "name": "no_desc_tool",
                    "description": null,
                    "inputSchema": {}
                }]
            }
        });

        let tools = tools_from_mcp(&response, "server").unwrap();
        assert_eq!(tools[0].description, "[server]");
        assert!(tools[0].args.is_empty());
    }

    #[test]
    fn test_missing_name_skips_tool() {
        let response = json!({
            "result": {
                "tools": [
                    { "description": "anonymous entry" },
                    { "name": "fetch_rates", "description": "FX rates" }
                ]
            }
        });

        let tools = tools_from_mcp(&response, "server").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "fetch_rates");
    }

    #[test]
    fn test_all_malformed_is_error() {
        let response = json!({ "result": { "tools": [{ "description": "x" }] } });
        assert!(tools_from_mcp(&response, "server").is_err());
    }

    #[test]
    fn test_overlong_description_is_cut_with_ellipsis() {
        let text = "A".repeat(600);
        let cut = truncate_description(&text);

        assert_eq!(cut.chars().count(), MAX_DESCRIPTION_LENGTH + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_description() {
        let cut = truncate_description(&"股".repeat(700));
        assert_eq!(cut.chars().count(), MAX_DESCRIPTION_LENGTH + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_short_description_is_untouched() {
        assert_eq!(truncate_description("Quote lookup"), "Quote lookup");
    }

    #[test]
    fn test_server_without_tools_yields_nothing() {
        let empty = json!({ "result": { "tools": [] } });
        assert!(tools_from_mcp(&empty, "server").unwrap().is_empty());
    }
}
