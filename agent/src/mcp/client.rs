//! MCP client
//!
//! [`McpClient`] is the entry point of the tool-server subsystem. It loads the
//! config once, starts every configured server concurrently, keeps the
//! registry accurate through caller-driven health checks and reconnects, and
//! executes tool calls behind the access policy.
//!
//! Nothing here schedules itself; callers decide when to run
//! [`McpClient::health_check`] and [`McpClient::reconnect_failed_servers`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{json, Value};

use super::connection::{discover_tools, establish, ServerConnection};
use super::content::resolve_outcome;
use super::error::{McpError, McpResult};
use super::policy::{Confirm, StdinConfirm, ToolAccessPolicy};
use super::registry::{HealthProbe, ServerRegistry};
use super::session::{RmcpConnector, SessionConnector};
use super::types::ToolInfo;
use crate::config::McpConfig;
use crate::shell;

/// Budget for connecting to one server and discovering its tools
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for one liveness probe
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum interval between two probes of the same connection
pub const HEALTH_CHECK_DEBOUNCE: Duration = Duration::from_secs(30);

/// Server tools that can run a shell command, in order of preference
const SHELL_TOOLS: &[&str] = &["bash", "shell", "exec", "run_command", "execute_command"];

/// Client for a set of MCP tool servers
pub struct McpClient {
    config_path: Option<PathBuf>,
    config: OnceLock<McpConfig>,
    registry: Arc<ServerRegistry>,
    connector: Arc<dyn SessionConnector>,
    confirm: Arc<dyn Confirm>,
    started: AtomicBool,
}

impl McpClient {
    /// Client reading its config from `config_path` or the default search paths
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            config: OnceLock::new(),
            registry: Arc::new(ServerRegistry::new()),
            connector: Arc::new(RmcpConnector),
            confirm: Arc::new(StdinConfirm),
            started: AtomicBool::new(false),
        }
    }

    /// Client over an already-loaded config
    pub fn from_config(config: McpConfig) -> Self {
        let client = Self::new(None);
        let mut config = config;
        config.normalize();
        let _ = client.config.set(config);
        client
    }

    /// Replace the session connector (mock transports in tests)
    pub fn with_connector(mut self, connector: Arc<dyn SessionConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace how unlisted tools are confirmed in safe mode
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Load the config on first use; later calls return the same document
    pub fn ensure_loaded(&self) -> &McpConfig {
        self.config
            .get_or_init(|| McpConfig::load(self.config_path.as_deref()))
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect to every configured server concurrently
    ///
    /// Waits until each server has finished its attempt. Failed servers are
    /// registered disconnected so a later reconnect can pick them up. A second
    /// call is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("MCP client already started");
            return;
        }

        let config = self.ensure_loaded();
        let total = config.servers.len();
        if total == 0 {
            tracing::debug!("No MCP servers configured");
            return;
        }

        let generation = self.registry.generation().await;
        let attempts = config.servers.iter().cloned().map(|spec| async move {
            let conn = establish(spec, self.connector.as_ref(), STARTUP_TIMEOUT).await;
            let connected = conn.is_connected();
            self.register_or_close(conn, generation).await && connected
        });
        let connected = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

        tracing::info!("Connected to {}/{} MCP servers", connected, total);
    }

    /// Register an attempt begun at `generation`, closing whatever is left over
    ///
    /// Returns false if the client was stopped while the attempt ran.
    async fn register_or_close(&self, conn: ServerConnection, generation: u64) -> bool {
        match self.registry.register_in(conn, generation).await {
            Ok(stale) => {
                if let Some(stale) = stale {
                    stale.close().await;
                }
                true
            }
            Err(orphan) => {
                if let Some(session) = orphan.session() {
                    session.close().await;
                }
                false
            }
        }
    }

    /// Close every session and empty the registry
    pub async fn stop(&self) {
        let sessions = self.registry.drain().await;
        tracing::debug!("Closing {} MCP sessions", sessions.len());
        join_all(sessions.iter().map(|session| session.close())).await;
        self.started.store(false, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Names of all callable tools, sorted
    pub async fn tools(&self) -> Vec<String> {
        self.ensure_loaded();
        self.registry.all_tools().await
    }

    /// Descriptions and normalized schemas of all callable tools
    pub async fn tool_infos(&self) -> Vec<ToolInfo> {
        self.ensure_loaded();
        self.registry.tool_infos().await
    }

    /// One status label per registered server, sorted by name
    pub async fn servers(&self) -> Vec<String> {
        self.ensure_loaded();
        self.registry
            .statuses()
            .await
            .iter()
            .map(|status| status.label())
            .collect()
    }

    pub async fn connected_server_names(&self) -> Vec<String> {
        self.ensure_loaded();
        self.registry.connected_servers().await
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Call a tool by name and return its result as text
    ///
    /// `arguments` must be a JSON object or null.
    pub async fn call_tool_by_name(&self, name: &str, arguments: Value) -> McpResult<String> {
        let config = self.ensure_loaded();
        self.check_policy(name, config).await?;

        let (server, session) = self.registry.lookup_tool(name).await?;
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(McpError::CallFailed {
                    tool: name.to_string(),
                    message: format!("arguments must be a JSON object, got {}", other),
                })
            }
        };

        tracing::debug!("Calling tool '{}' on server '{}'", name, server);
        let timeout = config.tool_timeout();
        let outcome = match tokio::time::timeout(timeout, session.call_tool(name, arguments)).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                return Err(McpError::CallFailed {
                    tool: name.to_string(),
                    message: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(McpError::Timeout {
                    operation: format!("Tool '{}' on server '{}'", name, server),
                    timeout,
                })
            }
        };

        resolve_outcome(name, outcome)
    }

    /// Run a shell command through a server's shell tool, or locally
    ///
    /// Falls back to local execution only when no server tool could take the
    /// command; policy rejections and tool failures are returned as they are.
    pub async fn exec_shell(&self, command: &str) -> McpResult<String> {
        let config = self.ensure_loaded();

        if let Some(tool) = self.shell_tool().await {
            match self
                .call_tool_by_name(&tool, json!({ "command": command }))
                .await
            {
                Err(e) if e.is_unavailable() => {
                    tracing::debug!("Shell tool '{}' unavailable ({}), running locally", tool, e);
                }
                result => return result,
            }
        }

        shell::run_local(command, config.tool_timeout()).await
    }

    async fn shell_tool(&self) -> Option<String> {
        for candidate in SHELL_TOOLS {
            if self.registry.owner_of(candidate).await.is_some() {
                return Some(candidate.to_string());
            }
        }
        None
    }

    /// Apply the access policy, prompting off the async runtime if needed
    async fn check_policy(&self, tool: &str, config: &McpConfig) -> McpResult<()> {
        let policy = ToolAccessPolicy::from_config(&config.tool_policy);
        if !policy.requires_confirmation(tool) {
            return policy.ensure_allowed(tool, self.confirm.as_ref());
        }

        let confirm = self.confirm.clone();
        let name = tool.to_string();
        tokio::task::spawn_blocking(move || policy.ensure_allowed(&name, confirm.as_ref()))
            .await
            .map_err(|e| McpError::CallFailed {
                tool: tool.to_string(),
                message: format!("confirmation prompt failed: {}", e),
            })?
    }

    // -------------------------------------------------------------------------
    // Health and recovery
    // -------------------------------------------------------------------------

    /// Probe every server with a live session and report who is connected
    ///
    /// Servers probed within the last 30 seconds are skipped. A server that
    /// announced a changed tool list is rediscovered after a successful probe;
    /// otherwise a recovered server gets its cached tools back.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let probes = self
            .registry
            .claim_health_checks(Instant::now(), HEALTH_CHECK_DEBOUNCE)
            .await;
        join_all(probes.into_iter().map(|probe| self.probe(probe))).await;
        self.registry.health_map().await
    }

    async fn probe(&self, probe: HealthProbe) {
        let failure = match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe.session.ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some(format!("no response within {:?}", HEALTH_CHECK_TIMEOUT)),
        };

        if let Some(message) = failure {
            let err = McpError::HealthCheck {
                server: probe.server.clone(),
                message,
            };
            if self
                .registry
                .mark_unhealthy(&probe.server, probe.epoch, &err)
                .await
            {
                tracing::warn!("{}", err);
            }
            return;
        }

        if self.registry.mark_healthy(&probe.server, probe.epoch).await {
            tracing::info!("MCP server '{}' is healthy again", probe.server);
        }
        if probe.session.take_tools_changed() {
            self.rediscover(probe).await;
        }
    }

    async fn rediscover(&self, probe: HealthProbe) {
        let tools = discover_tools(&probe.server, probe.session.as_ref()).await;
        let count = tools.len();
        if self
            .registry
            .replace_tools(&probe.server, probe.epoch, tools)
            .await
        {
            tracing::info!("Server '{}': tool list refreshed, {} tools", probe.server, count);
        }
    }

    /// Rediscover tools of connected servers that announced a change
    pub async fn refresh_changed_servers(&self) -> Vec<String> {
        let changed: Vec<HealthProbe> = self
            .registry
            .connected_sessions()
            .await
            .into_iter()
            .filter(|probe| probe.session.take_tools_changed())
            .collect();

        let names = changed.iter().map(|p| p.server.clone()).collect();
        join_all(changed.into_iter().map(|probe| self.rediscover(probe))).await;
        names
    }

    /// Start a fresh session for every disconnected server
    ///
    /// Returns the names of servers that came back.
    pub async fn reconnect_failed_servers(&self) -> Vec<String> {
        self.ensure_loaded();
        let targets = self.registry.claim_reconnects().await;
        if targets.is_empty() {
            return Vec::new();
        }
        tracing::debug!("Reconnecting {} MCP servers", targets.len());

        let attempts = targets.into_iter().map(|target| async move {
            if let Some(stale) = target.stale_session {
                stale.close().await;
            }

            let name = target.spec.name.clone();
            let conn = establish(target.spec, self.connector.as_ref(), STARTUP_TIMEOUT).await;
            if conn.is_connected() {
                if !self.register_or_close(conn, target.generation).await {
                    return None;
                }
                tracing::info!("Reconnected MCP server '{}'", name);
                return Some(name);
            }

            let err = McpError::Reconnect {
                server: name.clone(),
                message: conn.last_error().unwrap_or("unknown error").to_string(),
            };
            tracing::warn!("{}", err);
            self.registry.record_error(&name, &err).await;
            None
        });

        join_all(attempts).await.into_iter().flatten().collect()
    }
}
