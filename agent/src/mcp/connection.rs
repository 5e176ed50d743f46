//! Per-server connection state
//!
//! A [`ServerConnection`] is created by a startup or reconnect attempt and
//! then owned by the registry, which mutates it under its write lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::McpError;
use super::session::{SessionConnector, ToolSession};
use super::types::ToolInfo;
use crate::config::ServerSpec;

/// Runtime state of one configured server
pub struct ServerConnection {
    pub(crate) spec: ServerSpec,
    pub(crate) session: Option<Arc<dyn ToolSession>>,
    pub(crate) tools: Vec<ToolInfo>,
    pub(crate) connected: bool,
    pub(crate) last_error: Option<String>,
    pub(crate) last_health_check: Option<Instant>,
    /// Bumped by the registry on every (re)registration
    pub(crate) epoch: u64,
    /// A reconnect attempt currently owns this entry
    pub(crate) reconnecting: bool,
}

impl ServerConnection {
    /// A live connection with its discovered tools
    pub fn connected(spec: ServerSpec, session: Arc<dyn ToolSession>, tools: Vec<ToolInfo>) -> Self {
        Self {
            spec,
            session: Some(session),
            tools,
            connected: true,
            last_error: None,
            last_health_check: None,
            epoch: 0,
            reconnecting: false,
        }
    }

    /// A failed attempt, kept so reconnection can find it
    pub fn failed(spec: ServerSpec, error: &McpError) -> Self {
        Self {
            spec,
            session: None,
            tools: Vec::new(),
            connected: false,
            last_error: Some(error.to_string()),
            last_health_check: None,
            epoch: 0,
            reconnecting: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn session(&self) -> Option<&Arc<dyn ToolSession>> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    /// Whether a health check ran within `window`
    pub(crate) fn checked_within(&self, now: Instant, window: Duration) -> bool {
        self.last_health_check
            .is_some_and(|t| now.saturating_duration_since(t) < window)
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.spec.name.clone(),
            connected: self.connected,
            tool_count: self.tools.len(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time summary of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

impl ServerStatus {
    /// Human-readable label, e.g. `k8s (connected, 4 tools)`
    pub fn label(&self) -> String {
        if self.connected {
            format!("{} (connected, {} tools)", self.name, self.tool_count)
        } else {
            match &self.last_error {
                Some(error) => format!("{} (disconnected: {})", self.name, error),
                None => format!("{} (disconnected)", self.name),
            }
        }
    }
}

/// List every tool the session exposes, following pagination
///
/// Stops at the first failing page and keeps what was gathered so far.
pub async fn discover_tools(server: &str, session: &dyn ToolSession) -> Vec<ToolInfo> {
    let mut tools = Vec::new();
    collect_tools(server, session, &mut tools).await;
    tools
}

async fn collect_tools(server: &str, session: &dyn ToolSession, tools: &mut Vec<ToolInfo>) {
    let mut cursor: Option<String> = None;
    loop {
        let page = match session.list_tools_page(cursor.clone()).await {
            Ok(page) => page,
            Err(e) => {
                let err = McpError::Discovery {
                    server: server.to_string(),
                    message: format!("{:#}", e),
                };
                tracing::warn!("{}; keeping {} tools", err, tools.len());
                return;
            }
        };

        tools.extend(
            page.tools
                .into_iter()
                .map(|tool| ToolInfo::from_listed(server, tool)),
        );

        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            _ => return,
        }
    }
}

/// Connect to one server and discover its tools within `timeout`
///
/// Never fails: a failed attempt yields a disconnected connection carrying
/// the error. If discovery runs out of time the tools gathered so far are
/// kept.
pub async fn establish(
    spec: ServerSpec,
    connector: &dyn SessionConnector,
    timeout: Duration,
) -> ServerConnection {
    let started = Instant::now();
    tracing::debug!("Connecting to MCP server: {}", spec.name);

    let session = match tokio::time::timeout(timeout, connector.connect(&spec)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            let err = McpError::Connect {
                server: spec.name.clone(),
                message: format!("{:#}", e),
            };
            tracing::warn!("{}", err);
            return ServerConnection::failed(spec, &err);
        }
        Err(_) => {
            let err = McpError::Timeout {
                operation: format!("Startup of MCP server '{}'", spec.name),
                timeout,
            };
            tracing::warn!("{}", err);
            return ServerConnection::failed(spec, &err);
        }
    };

    let mut tools = Vec::new();
    let remaining = timeout.saturating_sub(started.elapsed());
    if tokio::time::timeout(remaining, collect_tools(&spec.name, &*session, &mut tools))
        .await
        .is_err()
    {
        tracing::warn!(
            "Tool discovery for '{}' timed out; keeping {} tools",
            spec.name,
            tools.len()
        );
    }

    tracing::info!("Server '{}': {} tools discovered", spec.name, tools.len());
    ServerConnection::connected(spec, session, tools)
}
