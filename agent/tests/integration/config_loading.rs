//! Config discovery and parsing from disk

use std::fs;

use kube_agent::config::McpConfig;
use tempfile::TempDir;

#[test]
fn test_json_map_form_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".mcp.json");
    fs::write(
        &path,
        r#"{
            "mcpServers": {
                "kubernetes": {"command": "kubectl-mcp", "args": ["--read-only"]},
                "prom": {"name": "prometheus", "url": "http://localhost:9090/mcp",
                         "auth": {"token": "${PROM_TOKEN}"}}
            },
            "toolPolicy": {"deny": ["delete_*"], "safeMode": true}
        }"#,
    )
    .unwrap();

    let config = McpConfig::load(Some(&path));
    let names: Vec<_> = config.servers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["kubernetes", "prometheus"]);
    assert!(config.mcp_servers.is_empty());
    assert!(config.servers[1].is_remote());
    assert_eq!(config.servers[1].auth.as_ref().unwrap().auth_type, "bearer");
    assert!(config.tool_policy.safe_mode);
    assert_eq!(config.tool_timeout_secs, 60);
}

#[test]
fn test_yaml_without_extension_is_sniffed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp-config");
    fs::write(
        &path,
        "servers:\n  - name: k8s\n    command: kubectl-mcp\n    env:\n      KUBECONFIG: /tmp/kc\ntoolTimeoutSecs: 5\n",
    )
    .unwrap();

    let config = McpConfig::load(Some(&path));
    assert_eq!(config.servers.len(), 1);
    assert_eq!(config.servers[0].env["KUBECONFIG"], "/tmp/kc");
    assert_eq!(config.tool_timeout().as_secs(), 5);
}

#[test]
fn test_broken_file_means_no_servers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".mcp.json");
    fs::write(&path, "{ not json").unwrap();

    let config = McpConfig::load(Some(&path));
    assert!(config.servers.is_empty());
    assert!(McpConfig::load_from_path(&path).is_err());
}
