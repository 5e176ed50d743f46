//! End-to-end client behavior over mock sessions

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use kube_agent::config::{McpConfig, ToolPolicyConfig};
use kube_agent::mcp::{AutoConfirm, CallOutcome, McpClient, McpError};

use crate::mock::{spec, MockConnector, MockSession};

fn client_for(names: &[&str], connector: Arc<MockConnector>, policy: ToolPolicyConfig) -> McpClient {
    let config = McpConfig {
        servers: names.iter().map(|n| spec(n)).collect(),
        tool_policy: policy,
        ..Default::default()
    };
    McpClient::from_config(config)
        .with_connector(connector)
        .with_confirm(Arc::new(AutoConfirm(true)))
}

#[tokio::test]
async fn test_catalog_after_start() {
    let k8s = MockSession::new(&["kubectl", "get_pods", "get_logs"]);
    let helm = MockSession::new(&["helm_list"]);
    let connector = MockConnector::with(&[("k8s", k8s), ("helm", helm)]);
    let client = client_for(&["k8s", "helm", "offline"], connector, Default::default());

    client.start().await;

    assert_eq!(
        client.tools().await,
        vec!["get_logs", "get_pods", "helm_list", "kubectl"]
    );
    assert_eq!(client.connected_server_names().await, vec!["helm", "k8s"]);

    let infos = client.tool_infos().await;
    assert_eq!(infos[0].server, "helm");
    assert!(infos.iter().all(|t| t.description.ends_with(" tool")));

    let labels = client.servers().await;
    assert_eq!(labels[0], "helm (connected, 1 tools)");
    assert_eq!(labels[1], "k8s (connected, 3 tools)");
    assert!(labels[2].starts_with("offline (disconnected: "));
    client.stop().await;
}

#[tokio::test]
async fn test_call_results_and_errors() {
    let k8s = MockSession::new(&["kubectl", "broken", "silent"]);
    k8s.respond("broken", CallOutcome::error("pods is forbidden"));
    k8s.respond("silent", CallOutcome::default());
    let connector = MockConnector::with(&[("k8s", k8s)]);
    let client = client_for(&["k8s"], connector, Default::default());
    client.start().await;

    let out = client
        .call_tool_by_name("kubectl", json!({"args": ["get", "ns"]}))
        .await
        .unwrap();
    let value: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["arguments"]["args"][1], "ns");

    assert_eq!(
        client.call_tool_by_name("broken", Value::Null).await,
        Err(McpError::ToolError {
            tool: "broken".to_string(),
            message: "pods is forbidden".to_string()
        })
    );
    assert_eq!(
        client.call_tool_by_name("silent", Value::Null).await,
        Err(McpError::NoContent("silent".to_string()))
    );
}

#[tokio::test]
async fn test_denied_tool_never_reaches_server() {
    let k8s = MockSession::new(&["dangerous-tool", "kubectl"]);
    let connector = MockConnector::with(&[("k8s", k8s.clone())]);
    let policy = ToolPolicyConfig {
        allow: vec!["*".to_string()],
        deny: vec!["dangerous-tool".to_string()],
        safe_mode: false,
    };
    let client = client_for(&["k8s"], connector, policy);
    client.start().await;

    let err = client
        .call_tool_by_name("dangerous-tool", Value::Null)
        .await
        .unwrap_err();
    assert!(err.is_policy());
    assert!(err.to_string().contains("dangerous-tool"));
    assert_eq!(k8s.calls.load(Ordering::SeqCst), 0);

    assert!(client.call_tool_by_name("kubectl", Value::Null).await.is_ok());
}

#[tokio::test]
async fn test_failed_server_recovers_on_reconnect() {
    let connector = MockConnector::with(&[]);
    let client = client_for(&["late"], connector.clone(), Default::default());
    client.start().await;
    assert!(client.tools().await.is_empty());

    // Still down: the error is refreshed, nothing is registered
    assert!(client.reconnect_failed_servers().await.is_empty());
    assert!(client.servers().await[0].contains("Failed to reconnect"));

    connector.add("late", MockSession::new(&["late_tool"]));
    assert_eq!(client.reconnect_failed_servers().await, vec!["late"]);
    assert_eq!(client.tools().await, vec!["late_tool"]);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unhealthy_server_is_reconnected_with_fresh_session() {
    let old = MockSession::new(&["kubectl"]);
    let connector = MockConnector::with(&[("k8s", old.clone())]);
    let client = client_for(&["k8s"], connector.clone(), Default::default());
    client.start().await;

    old.alive.store(false, Ordering::SeqCst);
    let health = client.health_check().await;
    assert_eq!(health["k8s"], false);
    assert!(matches!(
        client.call_tool_by_name("kubectl", Value::Null).await,
        Err(McpError::ServerNotConnected { .. })
    ));

    let fresh = MockSession::new(&["kubectl", "get_events"]);
    connector.add("k8s", fresh);
    assert_eq!(client.reconnect_failed_servers().await, vec!["k8s"]);
    assert!(old.closed.load(Ordering::SeqCst));
    assert_eq!(client.tools().await, vec!["get_events", "kubectl"]);
}

#[tokio::test]
async fn test_health_check_picks_up_changed_tool_list() {
    let k8s = MockSession::new(&["kubectl"]);
    let connector = MockConnector::with(&[("k8s", k8s.clone())]);
    let client = client_for(&["k8s"], connector, Default::default());
    client.start().await;

    k8s.set_tools(&["kubectl", "rollout_status"]);
    let health = client.health_check().await;
    assert_eq!(health["k8s"], true);
    assert_eq!(client.tools().await, vec!["kubectl", "rollout_status"]);
}

#[tokio::test]
async fn test_exec_shell_uses_server_tool() {
    let shell = MockSession::new(&["run_command"]);
    shell.respond("run_command", CallOutcome::text("NAME READY"));
    let connector = MockConnector::with(&[("sh", shell.clone())]);
    let client = client_for(&["sh"], connector, Default::default());
    client.start().await;

    assert_eq!(client.exec_shell("kubectl get pods").await.unwrap(), "NAME READY");
    assert_eq!(shell.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_closes_sessions() {
    let k8s = MockSession::new(&["kubectl"]);
    let connector = MockConnector::with(&[("k8s", k8s.clone())]);
    let client = client_for(&["k8s"], connector, Default::default());
    client.start().await;
    client.stop().await;

    assert!(k8s.closed.load(Ordering::SeqCst));
    assert!(client.servers().await.is_empty());
}

#[tokio::test]
async fn test_stop_wins_over_reconnect_in_flight() {
    let connector = MockConnector::with(&[]);
    let client = client_for(&["k8s"], connector.clone(), Default::default());
    client.start().await;
    assert!(client.tools().await.is_empty());

    let k8s = MockSession::new(&["kubectl"]);
    connector.add("k8s", k8s.clone());
    *connector.delay.lock().unwrap() = Duration::from_millis(200);

    let (recovered, ()) = tokio::join!(client.reconnect_failed_servers(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.stop().await;
    });

    assert!(recovered.is_empty());
    assert!(!client.is_started());
    assert!(client.registry().is_empty().await);
    assert!(client.tools().await.is_empty());
    assert!(k8s.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shared_tool_survives_one_server_failing() {
    let primary = MockSession::new(&["kubectl", "get_pods"]);
    let backup = MockSession::new(&["kubectl"]);
    let connector = MockConnector::with(&[("primary", primary.clone()), ("backup", backup)]);
    let client = client_for(&["primary", "backup"], connector, Default::default());
    client.start().await;
    assert_eq!(client.tools().await, vec!["get_pods", "kubectl"]);

    primary.alive.store(false, Ordering::SeqCst);
    let health = client.health_check().await;
    assert_eq!(health["primary"], false);
    assert_eq!(health["backup"], true);

    assert_eq!(client.tools().await, vec!["kubectl"]);
    assert!(client.call_tool_by_name("kubectl", Value::Null).await.is_ok());
    assert!(matches!(
        client.call_tool_by_name("get_pods", Value::Null).await,
        Err(McpError::ServerNotConnected { .. })
    ));
}
