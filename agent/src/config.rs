//! Configuration loading
//!
//! The MCP server document may be written in JSON or YAML and may list
//! servers either as an array (`servers`) or as a name-keyed map
//! (`mcpServers`). Both shapes are merged into the array form on load.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names probed in each directory, in order
const CONFIG_FILENAMES: &[&str] = &[".mcp.json", ".mcp.yaml", ".mcp.yml"];

/// Directory under the platform config dir holding the global config
const GLOBAL_CONFIG_DIR: &str = "kube-agent";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/kube-agent/
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        for filename in CONFIG_FILENAMES {
            let candidate = current.join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    let global_dir = dirs::config_dir()?.join(GLOBAL_CONFIG_DIR);
    CONFIG_FILENAMES
        .iter()
        .map(|filename| global_dir.join(filename.trim_start_matches('.')))
        .find(|candidate| candidate.is_file())
}

/// Document format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect the format from the file extension, falling back to the content
    pub fn detect(path: &Path, content: &str) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => Self::sniff(content),
        }
    }

    /// Guess the format from the first non-whitespace character
    pub fn sniff(content: &str) -> Self {
        match content.trim_start().chars().next() {
            Some('{') | Some('[') => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// MCP server configuration document (from .mcp.json / .mcp.yaml)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    /// Canonical array form
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    /// Alternate name-keyed form, emptied by [`McpConfig::normalize`]
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerSpec>,
    /// Allow/deny rules applied before every tool call
    #[serde(default)]
    pub tool_policy: ToolPolicyConfig,
    /// Per-call timeout for tool execution and the local shell fallback
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

/// One configured tool server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Remote endpoint; used instead of `command` when set
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// Credentials sent to a remote server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub token: String,
}

/// Tool access rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicyConfig {
    /// Glob patterns of permitted tools; empty permits everything
    #[serde(default)]
    pub allow: Vec<String>,
    /// Glob patterns of rejected tools; always wins over `allow`
    #[serde(default)]
    pub deny: Vec<String>,
    /// Ask before running tools that match neither list
    #[serde(default)]
    pub safe_mode: bool,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_auth_type() -> String {
    "bearer".to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            mcp_servers: BTreeMap::new(),
            tool_policy: ToolPolicyConfig::default(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ServerSpec {
    /// Whether this server is reached over the network instead of a subprocess
    pub fn is_remote(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

impl McpConfig {
    /// Load the MCP config, never failing
    ///
    /// Search order:
    /// 1. `explicit` path, when given and present
    /// 2. Walk up directory tree from cwd looking for .mcp.json / .mcp.yaml / .mcp.yml
    /// 3. Check ~/.config/kube-agent/ (global fallback)
    ///
    /// A missing or unparsable file yields an empty config.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) if path.is_file() => Some(path.to_path_buf()),
            Some(path) => {
                tracing::debug!("Config path {} does not exist", path.display());
                find_config_file()
            }
            None => find_config_file(),
        };

        let Some(path) = path else {
            tracing::debug!("No MCP config found, starting with zero servers");
            return Self::default();
        };

        tracing::debug!("Loading MCP config from: {}", path.display());
        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring MCP config {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content, ConfigFormat::detect(path, &content))
    }

    /// Parse a document and merge the map form into the array form
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let mut config: McpConfig = match format {
            ConfigFormat::Json => serde_json::from_str(content).context("Invalid JSON config")?,
            ConfigFormat::Yaml => serde_yaml::from_str(content).context("Invalid YAML config")?,
        };
        config.normalize();
        Ok(config)
    }

    /// Append every `mcpServers` entry to `servers` and clear the map
    ///
    /// The map key becomes the server name only when the entry has none.
    /// Calling this again is a no-op.
    pub fn normalize(&mut self) {
        for (key, mut spec) in std::mem::take(&mut self.mcp_servers) {
            if spec.name.trim().is_empty() {
                spec.name = key;
            }
            self.servers.push(spec);
        }
    }

    /// Per-call tool timeout
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}
