//! Tool and agent-type vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Tool definition offered to the model for function calling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Reference to the plugin method that performs a tool.
///
/// Not a live binding: the caller's plugin loader turns it into a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ToolHandler {
    pub plugin_name: String,
    pub provider_name: String,
    pub method: String,
}

impl ToolHandler {
    pub fn new(
        plugin_name: impl Into<String>,
        provider_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            provider_name: provider_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}::{}", self.plugin_name, self.provider_name, self.method)
    }
}

/// A tool as registered: its definition plus the handler it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn new(
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Closed set of agent variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// Files bug reports from conversations. Calls no tools.
    BugReporter,
    GithubMaintainer,
    CodeReviewer,
    WalletMonitor,
    Trader,
    Notifier,
}

impl AgentType {
    pub const ALL: [AgentType; 6] = [
        AgentType::BugReporter,
        AgentType::GithubMaintainer,
        AgentType::CodeReviewer,
        AgentType::WalletMonitor,
        AgentType::Trader,
        AgentType::Notifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BugReporter => "bug-reporter",
            Self::GithubMaintainer => "github-maintainer",
            Self::CodeReviewer => "code-reviewer",
            Self::WalletMonitor => "wallet-monitor",
            Self::Trader => "trader",
            Self::Notifier => "notifier",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CapabilityError::UnknownAgentType(s.to_string()))
    }
}
