//! Server registry
//!
//! Owns every [`ServerConnection`] and the tool-name index used to route
//! calls. All state sits behind one reader/writer lock; no I/O happens while
//! it is held. Updates coming back from health checks carry the epoch they
//! were started with and are dropped if the connection was replaced since.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::connection::{ServerConnection, ServerStatus};
use super::error::{McpError, McpResult};
use super::session::ToolSession;
use super::types::ToolInfo;
use crate::config::ServerSpec;

#[derive(Default)]
struct RegistryState {
    servers: HashMap<String, ServerConnection>,
    /// tool name -> owning server name; holds exactly the tools of connected servers
    tool_index: HashMap<String, String>,
    next_epoch: u64,
    /// Bumped by every drain; registrations begun before it are refused
    generation: u64,
}

impl RegistryState {
    /// Map a connected server's tools; `takeover` decides whether a name
    /// already owned by another live server moves to this one
    fn index_tools(&mut self, server: &str, takeover: &dyn Fn(&str) -> bool) {
        let names: Vec<String> = match self.servers.get(server) {
            Some(conn) if conn.connected => conn.tool_names().map(String::from).collect(),
            _ => return,
        };
        for name in names {
            let current = self.tool_index.get(&name).cloned();
            match current.as_deref() {
                Some(owner) if owner == server => {}
                Some(owner) if !takeover(&name) => {
                    tracing::debug!("Tool '{}' stays with '{}' over '{}'", name, owner, server);
                }
                Some(owner) => {
                    tracing::warn!(
                        "Tool '{}' from '{}' shadows the one from '{}'",
                        name,
                        server,
                        owner
                    );
                    self.tool_index.insert(name, server.to_string());
                }
                None => {
                    self.tool_index.insert(name, server.to_string());
                }
            }
        }
    }

    /// Drop a server's index entries, handing each freed name to another
    /// connected server that also serves it
    fn unindex_tools(&mut self, server: &str) {
        let owned = self.owned_by(server);
        self.release(server, owned);
    }

    fn release(&mut self, server: &str, names: impl IntoIterator<Item = String>) {
        for name in names {
            if self.tool_index.get(&name).map(String::as_str) != Some(server) {
                continue;
            }
            self.tool_index.remove(&name);
            if let Some(next) = self.connected_owner(&name, Some(server)) {
                self.tool_index.insert(name, next);
            }
        }
    }

    /// First connected server (by name) serving `tool`, other than `excluding`
    fn connected_owner(&self, tool: &str, excluding: Option<&str>) -> Option<String> {
        self.servers
            .values()
            .filter(|c| c.connected && c.session.is_some() && Some(c.name()) != excluding)
            .filter(|c| c.tool_names().any(|t| t == tool))
            .map(|c| c.name())
            .min()
            .map(String::from)
    }

    fn owned_by(&self, server: &str) -> HashSet<String> {
        self.tool_index
            .iter()
            .filter(|(_, owner)| owner.as_str() == server)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Connection at `name`, only if it is still at `epoch`
    fn current(&mut self, name: &str, epoch: u64) -> Option<&mut ServerConnection> {
        self.servers.get_mut(name).filter(|c| c.epoch == epoch)
    }

    fn insert(&mut self, mut conn: ServerConnection) -> Option<Arc<dyn ToolSession>> {
        let name = conn.spec.name.clone();

        self.next_epoch += 1;
        conn.epoch = self.next_epoch;
        conn.reconnecting = false;

        let previously = self.owned_by(&name);
        let serving: HashSet<String> = if conn.connected {
            conn.tool_names().map(String::from).collect()
        } else {
            HashSet::new()
        };
        let replaced = self.servers.insert(name.clone(), conn);
        self.release(&name, previously.difference(&serving).cloned().collect::<Vec<_>>());
        self.index_tools(&name, &|_| true);

        let new_session = self.servers.get(&name).and_then(|c| c.session.clone());
        replaced
            .and_then(|old| old.session)
            .filter(|old| !new_session.as_ref().is_some_and(|new| Arc::ptr_eq(old, new)))
    }
}

/// A connection picked for a health check
pub struct HealthProbe {
    pub server: String,
    pub epoch: u64,
    pub session: Arc<dyn ToolSession>,
}

/// A disconnected server picked for reconnection
pub struct ReconnectTarget {
    pub spec: ServerSpec,
    /// Previous session, to be closed before the new attempt
    pub stale_session: Option<Arc<dyn ToolSession>>,
    /// Drain generation the attempt belongs to
    pub generation: u64,
}

/// Concurrency-safe registry of server connections
#[derive(Default)]
pub struct ServerRegistry {
    state: RwLock<RegistryState>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a connection and index its tools when connected
    ///
    /// Returns the session of a replaced connection if it differs from the
    /// new one; the caller closes it outside the lock.
    pub async fn register(&self, conn: ServerConnection) -> Option<Arc<dyn ToolSession>> {
        self.state.write().await.insert(conn)
    }

    /// Like [`register`](Self::register), for attempts started at `generation`
    ///
    /// If the registry was drained since, the connection is handed back
    /// unregistered and the caller closes its session.
    pub async fn register_in(
        &self,
        conn: ServerConnection,
        generation: u64,
    ) -> Result<Option<Arc<dyn ToolSession>>, ServerConnection> {
        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::debug!("Registry drained; dropping connection to '{}'", conn.name());
            return Err(conn);
        }
        Ok(state.insert(conn))
    }

    /// Current drain generation, to pass to [`register_in`](Self::register_in)
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Route a tool call to a connected server serving it
    pub async fn lookup_tool(&self, tool: &str) -> McpResult<(String, Arc<dyn ToolSession>)> {
        let state = self.state.read().await;

        let live = |server: &str| {
            state
                .servers
                .get(server)
                .filter(|c| c.connected)
                .and_then(|c| c.session.clone())
                .map(|session| (server.to_string(), session))
        };

        if let Some(found) = state.tool_index.get(tool).and_then(|server| live(server.as_str())) {
            return Ok(found);
        }
        if let Some(found) = state
            .connected_owner(tool, None)
            .and_then(|server| live(&server))
        {
            return Ok(found);
        }

        // Known from an earlier discovery, but its server is down
        let owner = state
            .servers
            .values()
            .filter(|c| c.tool_names().any(|t| t == tool))
            .map(|c| c.name())
            .min();
        match owner {
            Some(server) => Err(McpError::ServerNotConnected {
                server: server.to_string(),
                tool: tool.to_string(),
            }),
            None => Err(McpError::ToolNotFound(tool.to_string())),
        }
    }

    /// Server owning `tool` in the index
    pub async fn owner_of(&self, tool: &str) -> Option<String> {
        self.state.read().await.tool_index.get(tool).cloned()
    }

    /// Names of all routable tools, sorted
    pub async fn all_tools(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut tools: Vec<String> = state.tool_index.keys().cloned().collect();
        tools.sort();
        tools
    }

    /// Tool descriptions of all routable tools, grouped by server name
    pub async fn tool_infos(&self) -> Vec<ToolInfo> {
        let state = self.state.read().await;
        let mut infos: Vec<ToolInfo> = state
            .servers
            .values()
            .filter(|c| c.connected)
            .flat_map(|c| c.tools.iter())
            .filter(|t| state.tool_index.get(&t.name) == Some(&t.server))
            .cloned()
            .collect();
        infos.sort_by(|a, b| a.server.cmp(&b.server).then_with(|| a.name.cmp(&b.name)));
        infos
    }

    /// Names of connected servers, sorted
    pub async fn connected_servers(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .servers
            .values()
            .filter(|c| c.connected)
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Status of every server, sorted by name
    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let state = self.state.read().await;
        let mut statuses: Vec<ServerStatus> = state.servers.values().map(|c| c.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn status(&self, server: &str) -> Option<ServerStatus> {
        self.state.read().await.servers.get(server).map(|c| c.status())
    }

    /// server name -> connected
    pub async fn health_map(&self) -> HashMap<String, bool> {
        let state = self.state.read().await;
        state
            .servers
            .iter()
            .map(|(name, c)| (name.clone(), c.connected))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.servers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.servers.is_empty()
    }

    // -------------------------------------------------------------------------
    // Health checks
    // -------------------------------------------------------------------------

    /// Pick servers with a session that were not checked within `debounce`
    ///
    /// Picked connections are stamped with `now`, so a second call inside the
    /// window picks nothing.
    pub async fn claim_health_checks(&self, now: Instant, debounce: Duration) -> Vec<HealthProbe> {
        let mut state = self.state.write().await;
        state
            .servers
            .values_mut()
            .filter(|c| !c.reconnecting && !c.checked_within(now, debounce))
            .filter_map(|c| {
                let session = c.session.clone()?;
                c.last_health_check = Some(now);
                Some(HealthProbe {
                    server: c.spec.name.clone(),
                    epoch: c.epoch,
                    session,
                })
            })
            .collect()
    }

    /// Mark a connection down and unmap its tools
    pub async fn mark_unhealthy(&self, server: &str, epoch: u64, error: &McpError) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.current(server, epoch) else {
            return false;
        };
        conn.connected = false;
        conn.last_error = Some(error.to_string());
        state.unindex_tools(server);
        true
    }

    /// Mark a connection up, restoring its cached tools if it was down
    ///
    /// Returns true when the connection transitioned to connected.
    pub async fn mark_healthy(&self, server: &str, epoch: u64) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.current(server, epoch) else {
            return false;
        };
        if conn.connected {
            return false;
        }
        conn.connected = true;
        conn.last_error = None;
        // Names taken over by other live servers meanwhile stay with them
        state.index_tools(server, &|_| false);
        true
    }

    /// Replace a connection's tools wholesale and re-index them
    ///
    /// Names the server keeps stay mapped to it; new names shared with
    /// another live server stay with that server.
    pub async fn replace_tools(&self, server: &str, epoch: u64, tools: Vec<ToolInfo>) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.current(server, epoch) else {
            return false;
        };
        let serving: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        conn.tools = tools;

        let dropped: Vec<String> = state
            .owned_by(server)
            .into_iter()
            .filter(|name| !serving.contains(name))
            .collect();
        state.release(server, dropped);
        state.index_tools(server, &|_| false);
        true
    }

    /// Connected servers with their sessions and epochs
    pub async fn connected_sessions(&self) -> Vec<HealthProbe> {
        let state = self.state.read().await;
        state
            .servers
            .values()
            .filter(|c| c.connected)
            .filter_map(|c| {
                Some(HealthProbe {
                    server: c.spec.name.clone(),
                    epoch: c.epoch,
                    session: c.session.clone()?,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Reconnection and shutdown
    // -------------------------------------------------------------------------

    /// Claim every disconnected server not already being reconnected
    ///
    /// The stale session is detached from the connection and handed to the
    /// caller to close.
    pub async fn claim_reconnects(&self) -> Vec<ReconnectTarget> {
        let mut state = self.state.write().await;
        let generation = state.generation;
        state
            .servers
            .values_mut()
            .filter(|c| !c.connected && !c.reconnecting)
            .map(|c| {
                c.reconnecting = true;
                ReconnectTarget {
                    spec: c.spec.clone(),
                    stale_session: c.session.take(),
                    generation,
                }
            })
            .collect()
    }

    /// Record a failed reconnect attempt, keeping the connection disconnected
    pub async fn record_error(&self, server: &str, error: &McpError) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.servers.get_mut(server) {
            conn.last_error = Some(error.to_string());
            conn.reconnecting = false;
        }
    }

    /// Empty the registry, returning every session for closing
    ///
    /// Attempts still in flight from before the drain can no longer register.
    pub async fn drain(&self) -> Vec<Arc<dyn ToolSession>> {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.tool_index.clear();
        state
            .servers
            .drain()
            .filter_map(|(_, conn)| conn.session)
            .collect()
    }
}
