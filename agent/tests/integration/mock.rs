//! In-memory MCP sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use kube_agent::config::ServerSpec;
use kube_agent::mcp::{CallOutcome, ListedTool, SessionConnector, ToolPage, ToolSession};

/// A server exposing a fixed tool list, split into pages of `page_size`
pub struct MockSession {
    pub tools: Mutex<Vec<ListedTool>>,
    pub page_size: usize,
    pub alive: AtomicBool,
    pub changed: AtomicBool,
    pub closed: AtomicBool,
    pub calls: AtomicUsize,
    /// Canned result per tool name; tools without one echo their arguments
    pub results: Mutex<HashMap<String, CallOutcome>>,
}

impl MockSession {
    pub fn new(tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tools: Mutex::new(tools.iter().map(|name| listed(name)).collect()),
            page_size: 2,
            alive: AtomicBool::new(true),
            changed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            results: Mutex::new(HashMap::new()),
        })
    }

    pub fn respond(&self, tool: &str, outcome: CallOutcome) {
        self.results
            .lock()
            .unwrap()
            .insert(tool.to_string(), outcome);
    }

    pub fn set_tools(&self, tools: &[&str]) {
        *self.tools.lock().unwrap() = tools.iter().map(|name| listed(name)).collect();
        self.changed.store(true, Ordering::SeqCst);
    }
}

pub fn listed(name: &str) -> ListedTool {
    ListedTool {
        name: name.to_string(),
        description: Some(format!("{} tool", name)),
        input_schema: json!({
            "type": "object",
            "properties": {"args": {"type": "array"}}
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ToolSession for MockSession {
    async fn list_tools_page(&self, cursor: Option<String>) -> anyhow::Result<ToolPage> {
        let tools = self.tools.lock().unwrap().clone();
        let start: usize = cursor.as_deref().unwrap_or("0").parse()?;
        let end = (start + self.page_size).min(tools.len());
        Ok(ToolPage {
            tools: tools[start..end].to_vec(),
            next_cursor: (end < tools.len()).then(|| end.to_string()),
        })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> anyhow::Result<CallOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.results.lock().unwrap().get(name) {
            return Ok(outcome.clone());
        }
        Ok(CallOutcome::structured(json!({
            "tool": name,
            "arguments": arguments.map(Value::Object).unwrap_or(Value::Null),
        })))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("broken pipe")
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn take_tools_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }
}

/// Hands out the registered session for a server name
#[derive(Default)]
pub struct MockConnector {
    pub sessions: Mutex<HashMap<String, Arc<MockSession>>>,
    pub attempts: AtomicUsize,
    /// Time each connect takes
    pub delay: Mutex<Duration>,
}

impl MockConnector {
    pub fn with(sessions: &[(&str, Arc<MockSession>)]) -> Arc<Self> {
        let connector = Self::default();
        for (name, session) in sessions {
            connector.add(name, session.clone());
        }
        Arc::new(connector)
    }

    pub fn add(&self, name: &str, session: Arc<MockSession>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(name.to_string(), session);
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, spec: &ServerSpec) -> anyhow::Result<Arc<dyn ToolSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let session = self.sessions.lock().unwrap().get(&spec.name).cloned();
        match session {
            Some(session) => Ok(session),
            None => anyhow::bail!("connection refused"),
        }
    }
}

pub fn spec(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        command: format!("{}-mcp", name),
        ..Default::default()
    }
}
