//! Tool invocation gate.
//!
//! Every tool call an agent makes passes through here: authorization is
//! checked against the registry before the handler is resolved, and only an
//! authorized call reaches the plugin loader.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::registry::CapabilityRegistry;
use crate::capability::tool::{AgentType, ToolDefinition, ToolHandler};
use crate::error::CapabilityError;

/// Turns a handler triple into a live plugin call. Implemented by the host.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn invoke(&self, handler: &ToolHandler, params: Value) -> Result<Value, String>;
}

#[derive(Clone)]
pub struct ToolGate {
    registry: Arc<CapabilityRegistry>,
    loader: Arc<dyn PluginLoader>,
}

impl ToolGate {
    pub fn new(registry: Arc<CapabilityRegistry>, loader: Arc<dyn PluginLoader>) -> Self {
        Self { registry, loader }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Tool definitions to offer an agent of this type.
    pub fn available_tools(&self, agent_type: AgentType) -> Vec<&ToolDefinition> {
        self.registry.definitions_for(agent_type)
    }

    /// Authorize, then resolve. Denials are logged on the `security` target.
    pub fn check(
        &self,
        agent_type: AgentType,
        tool_name: &str,
    ) -> Result<&ToolHandler, CapabilityError> {
        if !self.registry.authorize(agent_type, tool_name) {
            if self.registry.resolve(tool_name).is_none() {
                tracing::warn!(
                    target: "security",
                    agent_type = %agent_type,
                    tool = %tool_name,
                    "Denied call to unregistered tool"
                );
                return Err(CapabilityError::UnknownTool {
                    name: tool_name.to_string(),
                });
            }
            tracing::warn!(
                target: "security",
                agent_type = %agent_type,
                tool = %tool_name,
                "Denied tool call outside agent allow-list"
            );
            return Err(CapabilityError::Forbidden {
                agent_type: agent_type.to_string(),
                tool: tool_name.to_string(),
            });
        }

        // An authorized name is always registered; build() guarantees it.
        self.registry
            .resolve(tool_name)
            .ok_or_else(|| CapabilityError::UnknownTool {
                name: tool_name.to_string(),
            })
    }

    /// Check the call and, if allowed, hand it to the plugin loader.
    pub async fn invoke(
        &self,
        agent_type: AgentType,
        tool_name: &str,
        params: Value,
    ) -> Result<Value, CapabilityError> {
        let handler = self.check(agent_type, tool_name)?;
        tracing::debug!(
            agent_type = %agent_type,
            tool = %tool_name,
            handler = %handler,
            "Dispatching tool call"
        );
        self.loader
            .invoke(handler, params)
            .await
            .map_err(|reason| CapabilityError::ExecutionFailed {
                name: tool_name.to_string(),
                reason,
            })
    }
}
