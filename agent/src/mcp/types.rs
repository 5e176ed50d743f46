//! MCP type definitions
//!
//! Shared types used across the registry, sessions and executor.

use serde::Serialize;
use serde_json::Value;

/// A tool as reported by a server's tool listing, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListedTool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Title carried in the tool's annotations, if any
    pub annotation_title: Option<String>,
    pub input_schema: Value,
}

/// One page of a paginated tool listing
#[derive(Debug, Clone, Default)]
pub struct ToolPage {
    pub tools: Vec<ListedTool>,
    pub next_cursor: Option<String>,
}

/// A tool discovered on an MCP server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    /// Server this tool belongs to
    pub server: String,
    /// Tool name, unique within its server
    pub name: String,
    pub title: Option<String>,
    /// Resolved description (never empty)
    pub description: String,
    /// Normalized input schema (JSON)
    pub input_schema: Value,
}

impl ToolInfo {
    /// Build from a listed tool, resolving the description fallback chain
    /// and normalizing the input schema
    pub fn from_listed(server: &str, tool: ListedTool) -> Self {
        let description = resolve_description(&tool);
        let input_schema = super::schema::normalize_tool_schema(&tool.name, &tool.input_schema);
        Self {
            server: server.to_string(),
            title: tool.title.or(tool.annotation_title),
            name: tool.name,
            description,
            input_schema,
        }
    }
}

/// description -> title -> annotation title -> "Tool: <name>"
fn resolve_description(tool: &ListedTool) -> String {
    [&tool.description, &tool.title, &tool.annotation_title]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Tool: {}", tool.name))
}
