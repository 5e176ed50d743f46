//! MCP error taxonomy
//!
//! Discovery, health-check and reconnect failures are absorbed into
//! connection state; execution and policy failures are returned to callers.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the MCP tool-server client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to connect to MCP server '{server}': {message}")]
    Connect { server: String, message: String },

    #[error("Failed to list tools from MCP server '{server}': {message}")]
    Discovery { server: String, message: String },

    #[error("Health check failed for MCP server '{server}': {message}")]
    HealthCheck { server: String, message: String },

    #[error("Failed to reconnect MCP server '{server}': {message}")]
    Reconnect { server: String, message: String },

    #[error("Tool '{0}' not found in any MCP server")]
    ToolNotFound(String),

    #[error("MCP server '{server}' providing tool '{tool}' is not connected")]
    ServerNotConnected { server: String, tool: String },

    #[error("Failed to call tool '{tool}': {message}")]
    CallFailed { tool: String, message: String },

    #[error("Tool '{tool}' returned an error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Tool '{0}' returned no structured or text content")]
    NoContent(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Tool '{tool}' is denied by pattern '{pattern}'")]
    PolicyDenied { tool: String, pattern: String },

    #[error("Execution of tool '{0}' was declined")]
    UserDeclined(String),

    #[error("Shell command failed: {0}")]
    Shell(String),
}

impl McpError {
    /// Whether the error means no usable server-side tool was reachable
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            McpError::ToolNotFound(_) | McpError::ServerNotConnected { .. }
        )
    }

    /// Whether the error came from the access policy
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            McpError::PolicyDenied { .. } | McpError::UserDeclined(_)
        )
    }
}

/// Result alias for MCP client operations
pub type McpResult<T> = Result<T, McpError>;
