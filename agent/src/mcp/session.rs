//! Protocol sessions
//!
//! [`ToolSession`] is the seam between the registry and the wire protocol.
//! [`RmcpConnector`] establishes real sessions with `rmcp`: stdio servers run
//! as child processes, remote servers are reached over streamable HTTP.
//!
//! A session owns its transport. For stdio servers that includes the child
//! process, so [`ToolSession::close`] cancels the service and kills the child
//! in one step. Dropping an `RmcpSession` has the same effect.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParam, ClientRequest, PaginatedRequestParam, PingRequest, RawContent, Tool,
    },
    service::{NotificationContext, Peer, RunningService},
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig,
        StreamableHttpClientTransport, TokioChildProcess,
    },
    ClientHandler, RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::content::CallOutcome;
use super::types::{ListedTool, ToolPage};
use crate::config::ServerSpec;

/// An established session with one tool server
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Fetch one page of the tool listing; `None` requests the first page
    async fn list_tools_page(&self, cursor: Option<String>) -> Result<ToolPage>;

    async fn call_tool(&self, name: &str, arguments: Option<Map<String, Value>>)
        -> Result<CallOutcome>;

    /// Protocol-level liveness probe
    async fn ping(&self) -> Result<()>;

    /// Cancel the session and terminate anything it owns
    async fn close(&self);

    /// Whether the server announced a changed tool list since the last call
    fn take_tools_changed(&self) -> bool;
}

/// Establishes sessions from server specs
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, spec: &ServerSpec) -> Result<Arc<dyn ToolSession>>;
}

// =============================================================================
// rmcp-backed implementation
// =============================================================================

/// Client handler recording `notifications/tools/list_changed`
struct ListChangedHandler {
    server: String,
    tools_changed: Arc<AtomicBool>,
}

impl ClientHandler for ListChangedHandler {
    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        tracing::debug!("Server '{}' announced a changed tool list", self.server);
        self.tools_changed.store(true, Ordering::SeqCst);
        std::future::ready(())
    }
}

type RmcpService = RunningService<RoleClient, ListChangedHandler>;

/// Session over an `rmcp` running service
pub struct RmcpSession {
    server: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RmcpService>>,
    tools_changed: Arc<AtomicBool>,
}

impl RmcpSession {
    fn new(server: &str, service: RmcpService, tools_changed: Arc<AtomicBool>) -> Self {
        Self {
            server: server.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            tools_changed,
        }
    }
}

fn listed_tool(tool: Tool) -> ListedTool {
    ListedTool {
        annotation_title: tool.annotations.as_ref().and_then(|a| a.title.clone()),
        input_schema: serde_json::to_value(&tool.input_schema).unwrap_or_default(),
        title: tool.title.clone(),
        description: tool.description.map(|d| d.to_string()),
        name: tool.name.to_string(),
    }
}

#[async_trait]
impl ToolSession for RmcpSession {
    async fn list_tools_page(&self, cursor: Option<String>) -> Result<ToolPage> {
        let params = cursor.map(|cursor| PaginatedRequestParam {
            cursor: Some(cursor),
        });
        let response = self
            .peer
            .list_tools(params)
            .await
            .context("Failed to list tools")?;

        Ok(ToolPage {
            tools: response.tools.into_iter().map(listed_tool).collect(),
            next_cursor: response.next_cursor,
        })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallOutcome> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
                task: None,
            })
            .await
            .context("Failed to call tool")?;

        let text = result
            .content
            .iter()
            .filter_map(|content| match &content.raw {
                RawContent::Text(text) => Some(text.text.to_string()),
                _ => None,
            })
            .collect();

        Ok(CallOutcome {
            is_error: result.is_error.unwrap_or(false),
            structured: result.structured_content,
            text,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.peer
            .send_request(ClientRequest::PingRequest(PingRequest::default()))
            .await
            .context("Ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(service) = self.service.lock().await.take() {
            tracing::debug!("Closing MCP session: {}", self.server);
            if let Err(e) = service.cancel().await {
                tracing::warn!("Error canceling MCP server {}: {}", self.server, e);
            }
        }
    }

    fn take_tools_changed(&self) -> bool {
        self.tools_changed.swap(false, Ordering::SeqCst)
    }
}

/// Connector backed by `rmcp` transports
#[derive(Debug, Default, Clone)]
pub struct RmcpConnector;

impl RmcpConnector {
    /// Launch command with the server's environment applied
    fn build_command(spec: &ServerSpec) -> Command {
        let mut cmd = Command::new(&spec.command);
        if !spec.args.is_empty() {
            cmd.args(&spec.args);
        }
        for (key, value) in &spec.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        cmd.stderr(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Token to send as a bearer credential, if any; `${VAR}` references
    /// are expanded like `env` values
    fn bearer_token(spec: &ServerSpec) -> Option<String> {
        let auth = spec.auth.as_ref()?;
        let token = shellexpand::env(&auth.token)
            .unwrap_or_else(|_| auth.token.as_str().into())
            .into_owned();
        if token.trim().is_empty() {
            return None;
        }
        if !auth.auth_type.eq_ignore_ascii_case("bearer") {
            tracing::warn!(
                "Server '{}': unsupported auth type '{}', sending token as bearer",
                spec.name,
                auth.auth_type
            );
        }
        Some(token)
    }
}

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn connect(&self, spec: &ServerSpec) -> Result<Arc<dyn ToolSession>> {
        let tools_changed = Arc::new(AtomicBool::new(false));
        let handler = ListChangedHandler {
            server: spec.name.clone(),
            tools_changed: tools_changed.clone(),
        };

        let service = if let Some(url) = spec.url.as_deref().filter(|_| spec.is_remote()) {
            tracing::debug!("Connecting to remote MCP server {} at {}", spec.name, url);
            let transport = match Self::bearer_token(spec) {
                Some(token) => {
                    let mut config = StreamableHttpClientTransportConfig::with_uri(url);
                    config.auth_header = Some(token);
                    StreamableHttpClientTransport::from_config(config)
                }
                None => StreamableHttpClientTransport::from_uri(url),
            };
            handler
                .serve(transport)
                .await
                .context(format!("Failed to initialize MCP server: {}", spec.name))?
        } else {
            if spec.command.trim().is_empty() {
                bail!("Server '{}' has neither a command nor a url", spec.name);
            }
            tracing::debug!("Spawning MCP server {}: {}", spec.name, spec.command);
            let transport = TokioChildProcess::new(Self::build_command(spec))
                .context(format!("Failed to spawn MCP server: {}", spec.name))?;
            handler
                .serve(transport)
                .await
                .context(format!("Failed to initialize MCP server: {}", spec.name))?
        };

        Ok(Arc::new(RmcpSession::new(&spec.name, service, tools_changed)))
    }
}
