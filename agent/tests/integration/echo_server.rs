//! A configured server that is not an MCP server at all

use std::fs;
use std::time::Duration;

use kube_agent::mcp::McpClient;
use tempfile::TempDir;

#[tokio::test]
async fn test_echo_server_never_panics() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".mcp.yaml");
    fs::write(
        &path,
        "servers:\n  - name: echo\n    command: echo\n    args: [hello]\n",
    )
    .unwrap();

    let client = McpClient::new(Some(path));
    tokio::time::timeout(Duration::from_secs(60), client.start())
        .await
        .unwrap();

    // echo exits without speaking the protocol; either outcome is fine
    let servers = client.servers().await;
    assert_eq!(servers.len(), 1);
    assert!(servers[0].starts_with("echo ("));
    assert!(client.tools().await.is_empty());

    let health = client.health_check().await;
    assert!(health.contains_key("echo"));
    client.stop().await;
}
