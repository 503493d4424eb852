//! Type definitions for the ingestion module.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One argument of a tool. Owned by exactly one [`Tool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArg {
    #[serde(alias = "ArgName")]
    pub name: String,

    #[serde(alias = "ArgDescription", default)]
    pub description: String,
}

impl ToolArg {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Tool definition as submitted for indexing.
///
/// Accepts both `name`/`description`/`args` and the
/// `ToolName`/`ToolDescription`/`Args` spelling. The identifier is optional;
/// one is assigned when the tool is created.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    #[serde(alias = "uuid", default)]
    pub id: Option<Uuid>,

    #[serde(alias = "ToolName")]
    pub name: String,

    #[serde(alias = "ToolDescription", default)]
    pub description: String,

    #[serde(alias = "Args", default)]
    pub args: Vec<ToolArg>,
}

/// A callable tool as stored in the record store.
///
/// Immutable once indexed; re-indexing with the same `id` overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(alias = "uuid")]
    pub id: Uuid,

    #[serde(alias = "ToolName")]
    pub name: String,

    #[serde(alias = "ToolDescription", default)]
    pub description: String,

    #[serde(alias = "Args", default)]
    pub args: Vec<ToolArg>,
}

/// Textual view of a tool handed to rerankers. Excludes the identifier so
/// that two tools only serialize identically when their content matches.
#[derive(Serialize)]
struct ToolDocument<'a> {
    name: &'a str,
    description: &'a str,
    args: &'a [ToolArg],
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, args: Vec<ToolArg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            args,
        }
    }

    /// Build a tool from a submitted definition, assigning an id if absent.
    pub fn from_definition(definition: ToolDefinition) -> Result<Self> {
        let name = definition.name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError(
                "Tool name cannot be empty".to_string(),
            ));
        }
        if let Some(arg) = definition.args.iter().find(|a| a.name.trim().is_empty()) {
            return Err(AppError::ValidationError(format!(
                "Tool '{}' has an argument with an empty name (description: {:?})",
                name, arg.description
            )));
        }

        Ok(Self {
            id: definition.id.unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            description: definition.description,
            args: definition.args,
        })
    }

    /// Pretty JSON of name, description and args, used as the reranker document.
    pub fn to_document(&self) -> String {
        let doc = ToolDocument {
            name: &self.name,
            description: &self.description,
            args: &self.args,
        };
        // Serializing plain strings into JSON cannot fail.
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    }

    /// Name, description and argument fields one per line, without any
    /// field labels. Keyword matching runs over this text.
    pub fn keyword_text(&self) -> String {
        let mut lines = vec![self.name.as_str(), self.description.as_str()];
        for arg in &self.args {
            lines.push(&arg.name);
            lines.push(&arg.description);
        }
        lines.join("\n")
    }
}

/// Which part of a tool a slice was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceKind {
    Overview,
    Parameter,
}

impl SliceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SliceKind::Overview => "overview",
            SliceKind::Parameter => "parameter",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            SliceKind::Overview => 0,
            SliceKind::Parameter => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SliceKind::Overview),
            1 => Some(SliceKind::Parameter),
            _ => None,
        }
    }
}

/// An embedded fragment of exactly one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSlice {
    /// Back-reference to the owning tool.
    pub tool_id: Uuid,
    pub kind: SliceKind,
    pub embedding: Vec<f32>,
}
