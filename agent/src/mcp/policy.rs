//! Tool access policy
//!
//! Allow/deny evaluation applied before every tool call. Deny patterns
//! always win; an empty allow list permits everything. Tools matching
//! neither list are confirmed interactively in safe mode and permitted
//! with a warning otherwise.

use std::io::{BufRead, Write};

use glob::{MatchOptions, Pattern};

use super::error::{McpError, McpResult};
use crate::config::ToolPolicyConfig;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Case-insensitive shell-style match (`*`, `?`, `[...]`)
///
/// A pattern that is not a valid glob is compared literally.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(glob) => glob.matches_with(name, MATCH_OPTIONS),
        Err(_) => pattern.eq_ignore_ascii_case(name),
    }
}

/// Outcome of evaluating the allow/deny lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// Rejected by the given deny pattern
    Deny(String),
    /// Matches neither list while an allow list is configured
    Unlisted,
}

/// Asks the user whether an unlisted tool may run
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Prompts on stderr and reads a yes/no answer from stdin, defaulting to no
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        let mut stderr = std::io::stderr();
        if write!(stderr, "{} [y/N] ", prompt).and_then(|_| stderr.flush()).is_err() {
            return false;
        }

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Fixed answer, for non-interactive callers and tests
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Allow/deny rules for tool calls
#[derive(Debug, Clone, Default)]
pub struct ToolAccessPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
    safe_mode: bool,
}

impl ToolAccessPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>, safe_mode: bool) -> Self {
        Self {
            allow,
            deny,
            safe_mode,
        }
    }

    pub fn from_config(config: &ToolPolicyConfig) -> Self {
        Self::new(config.allow.clone(), config.deny.clone(), config.safe_mode)
    }

    /// Evaluate the lists without prompting
    pub fn evaluate(&self, tool: &str) -> PolicyDecision {
        if let Some(pattern) = self.deny.iter().find(|p| wildcard_match(p, tool)) {
            return PolicyDecision::Deny(pattern.clone());
        }
        if self.allow.is_empty() || self.allow.iter().any(|p| wildcard_match(p, tool)) {
            return PolicyDecision::Allow;
        }
        PolicyDecision::Unlisted
    }

    /// Whether unlisted tools require confirmation
    pub fn requires_confirmation(&self, tool: &str) -> bool {
        self.safe_mode && self.evaluate(tool) == PolicyDecision::Unlisted
    }

    /// Permit or reject a call to `tool`
    ///
    /// `confirm` is only consulted for unlisted tools in safe mode and may
    /// block on user input.
    pub fn ensure_allowed(&self, tool: &str, confirm: &dyn Confirm) -> McpResult<()> {
        match self.evaluate(tool) {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(pattern) => {
                tracing::warn!("Tool '{}' denied by pattern '{}'", tool, pattern);
                Err(McpError::PolicyDenied {
                    tool: tool.to_string(),
                    pattern,
                })
            }
            PolicyDecision::Unlisted if self.safe_mode => {
                let prompt = format!("Tool '{}' is not in the allow list. Run it anyway?", tool);
                if confirm.confirm(&prompt) {
                    Ok(())
                } else {
                    Err(McpError::UserDeclined(tool.to_string()))
                }
            }
            PolicyDecision::Unlisted => {
                tracing::warn!(
                    "Tool '{}' is not in the allow list; running it because safe mode is off",
                    tool
                );
                Ok(())
            }
        }
    }
}
