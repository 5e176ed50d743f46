//! MCP (Model Context Protocol) tool-server client
//!
//! Connects to the servers declared in `.mcp.json` / `.mcp.yaml`, keeps a
//! registry routing tool names to live sessions, and executes tool calls
//! behind an allow/deny policy.

mod client;
mod connection;
mod content;
mod error;
mod policy;
mod registry;
mod schema;
mod session;
mod types;

pub use client::{McpClient, HEALTH_CHECK_DEBOUNCE, HEALTH_CHECK_TIMEOUT, STARTUP_TIMEOUT};
pub use connection::{discover_tools, establish, ServerConnection, ServerStatus};
pub use content::{resolve_outcome, CallOutcome, ToolOutput};
pub use error::{McpError, McpResult};
pub use policy::{wildcard_match, AutoConfirm, Confirm, PolicyDecision, StdinConfirm, ToolAccessPolicy};
pub use registry::{HealthProbe, ReconnectTarget, ServerRegistry};
pub use schema::{normalize_schema, normalize_tool_schema};
pub use session::{RmcpConnector, RmcpSession, SessionConnector, ToolSession};
pub use types::{ListedTool, ToolInfo, ToolPage};
