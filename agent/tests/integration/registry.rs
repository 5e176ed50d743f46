//! Registry routing and connection state

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube_agent::mcp::{
    discover_tools, establish, McpError, ServerConnection, ServerRegistry, ToolInfo, ToolSession,
};

use crate::mock::{listed, spec, MockConnector, MockSession};

fn infos(server: &str, tools: &[&str]) -> Vec<ToolInfo> {
    tools
        .iter()
        .map(|name| ToolInfo::from_listed(server, listed(name)))
        .collect()
}

#[tokio::test]
async fn test_every_registered_tool_resolves_to_its_server() {
    let registry = ServerRegistry::new();
    let servers: &[(&str, &[&str])] = &[
        ("k8s", &["kubectl", "get_pods", "describe"]),
        ("helm", &["helm_list"]),
        ("empty", &[]),
    ];

    for (name, tools) in servers {
        let session: Arc<dyn ToolSession> = MockSession::new(tools);
        registry
            .register(ServerConnection::connected(spec(name), session, infos(name, tools)))
            .await;
    }

    let mut expected = Vec::new();
    for (name, tools) in servers {
        for tool in *tools {
            let (owner, _) = registry.lookup_tool(tool).await.unwrap();
            assert_eq!(owner, *name);
            expected.push(tool.to_string());
        }
    }
    expected.sort();
    assert_eq!(registry.all_tools().await, expected);
}

#[tokio::test]
async fn test_connected_servers_matches_flags() {
    let registry = ServerRegistry::new();
    let refused = McpError::Connect {
        server: "down".to_string(),
        message: "refused".to_string(),
    };
    registry
        .register(ServerConnection::failed(spec("down"), &refused))
        .await;
    registry
        .register(ServerConnection::connected(
            spec("up"),
            MockSession::new(&["a"]),
            infos("up", &["a"]),
        ))
        .await;

    assert_eq!(registry.connected_servers().await, vec!["up"]);
    let statuses = registry.statuses().await;
    assert_eq!(statuses.len(), 2);
    assert!(!statuses[0].connected);
    assert_eq!(statuses[1].label(), "up (connected, 1 tools)");
}

#[tokio::test]
async fn test_replacing_a_connection_returns_old_session() {
    let registry = ServerRegistry::new();
    let first = MockSession::new(&["a"]);
    let second = MockSession::new(&["b"]);

    registry
        .register(ServerConnection::connected(spec("s"), first.clone(), infos("s", &["a"])))
        .await;
    let stale = registry
        .register(ServerConnection::connected(spec("s"), second, infos("s", &["b"])))
        .await;

    assert!(stale.is_some());
    assert_eq!(registry.all_tools().await, vec!["b"]);
    assert!(matches!(
        registry.lookup_tool("a").await,
        Err(McpError::ToolNotFound(_))
    ));
}

#[tokio::test]
async fn test_discovery_follows_pagination() {
    let session = MockSession::new(&["a", "b", "c", "d", "e"]);
    let tools = discover_tools("s", session.as_ref()).await;
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    // Schemas come back normalized
    assert_eq!(tools[0].input_schema["properties"]["args"]["items"]["type"], "string");
}

#[tokio::test]
async fn test_establish_failure_yields_disconnected_entry() {
    let connector = MockConnector::with(&[]);
    let conn = establish(spec("ghost"), connector.as_ref(), Duration::from_secs(1)).await;
    assert!(!conn.is_connected());
    assert!(conn.last_error().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_concurrent_readers_during_updates() {
    let registry = Arc::new(ServerRegistry::new());
    registry
        .register(ServerConnection::connected(
            spec("k8s"),
            MockSession::new(&["kubectl"]),
            infos("k8s", &["kubectl"]),
        ))
        .await;

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for round in 0..50 {
                let tools = if round % 2 == 0 {
                    vec!["kubectl", "helm"]
                } else {
                    vec!["kubectl"]
                };
                let session = MockSession::new(&tools);
                registry
                    .register(ServerConnection::connected(spec("k8s"), session, infos("k8s", &tools)))
                    .await;
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    // A server's tools are registered all at once
                    assert!(registry.lookup_tool("kubectl").await.is_ok());
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let window = Duration::from_secs(30);
    assert_eq!(registry.claim_health_checks(Instant::now(), window).await.len(), 1);
}
