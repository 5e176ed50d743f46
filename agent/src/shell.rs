//! Local shell execution
//!
//! Fallback used when no connected server offers a shell tool.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::mcp::{McpError, McpResult};

/// Run `command` with `sh -c`, returning stdout followed by stderr
///
/// The child is killed if `timeout` elapses. A non-zero exit is an error
/// carrying the combined output.
pub async fn run_local(command: &str, timeout: Duration) -> McpResult<String> {
    tracing::debug!("Running local command: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| McpError::Shell(format!("failed to spawn sh: {}", e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(McpError::Shell(format!("failed to wait for command: {}", e))),
        Err(_) => {
            return Err(McpError::Timeout {
                operation: format!("Command '{}'", command),
                timeout,
            })
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }

    if output.status.success() {
        Ok(combined)
    } else {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(McpError::Shell(format!("exit status {}: {}", code, combined.trim_end())))
    }
}
