//! Kubernetes assistant agent: MCP tool-server client and local shell fallback

pub mod config;
pub mod mcp;
pub mod shell;
