//! Tool call results
//!
//! Servers answer with structured content, text blocks, or both. The
//! executor resolves that once into a single string.

use serde_json::Value;

use super::error::{McpError, McpResult};

/// Protocol-neutral view of a tool call response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    pub is_error: bool,
    pub structured: Option<Value>,
    /// Text blocks in server order
    pub text: Vec<String>,
}

impl CallOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: vec![text.into()],
            ..Default::default()
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            structured: Some(value),
            ..Default::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: vec![text.into()],
            ..Default::default()
        }
    }
}

/// Usable payload of a successful call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Structured(Value),
    Text(String),
    Empty,
}

impl ToolOutput {
    /// Prefer structured content over concatenated text
    pub fn from_outcome(outcome: CallOutcome) -> Self {
        if let Some(value) = outcome.structured.filter(|v| !v.is_null()) {
            return ToolOutput::Structured(value);
        }
        let text = join_text(&outcome.text);
        if text.is_empty() {
            ToolOutput::Empty
        } else {
            ToolOutput::Text(text)
        }
    }

    pub fn into_text(self, tool: &str) -> McpResult<String> {
        match self {
            ToolOutput::Structured(value) => {
                serde_json::to_string_pretty(&value).map_err(|e| McpError::CallFailed {
                    tool: tool.to_string(),
                    message: format!("Failed to serialize structured content: {}", e),
                })
            }
            ToolOutput::Text(text) => Ok(text),
            ToolOutput::Empty => Err(McpError::NoContent(tool.to_string())),
        }
    }
}

fn join_text(blocks: &[String]) -> String {
    blocks
        .iter()
        .filter(|t| !t.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn a call outcome into the caller-facing string
pub fn resolve_outcome(tool: &str, outcome: CallOutcome) -> McpResult<String> {
    if outcome.is_error {
        let details = join_text(&outcome.text);
        let message = if details.is_empty() {
            "no error details returned".to_string()
        } else {
            details
        };
        return Err(McpError::ToolError {
            tool: tool.to_string(),
            message,
        });
    }
    ToolOutput::from_outcome(outcome).into_text(tool)
}
