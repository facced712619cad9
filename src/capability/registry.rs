//! Capability registry: which agent types may call which tools.
//!
//! Built once at startup and never mutated; share it behind an `Arc`.

use std::collections::{HashMap, HashSet};

use crate::capability::catalog::{BUILTIN_GRANTS, builtin_tools};
use crate::capability::tool::{AgentType, RegisteredTool, ToolDefinition, ToolHandler};
use crate::error::CapabilityError;

/// Immutable tool table plus per-agent allow-lists.
#[derive(Debug)]
pub struct CapabilityRegistry {
    /// Registry order is preserved for `definitions_for`.
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    grants: HashMap<AgentType, HashSet<String>>,
}

impl CapabilityRegistry {
    /// Build and validate a registry.
    ///
    /// Fails on duplicate tool names, on an allow-list naming an undefined
    /// tool, and on an agent type with zero or several allow-list entries.
    pub fn build(
        tools: Vec<RegisteredTool>,
        grants: &[(AgentType, &[&str])],
    ) -> Result<Self, CapabilityError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if index.insert(tool.name().to_string(), i).is_some() {
                return Err(CapabilityError::DuplicateTool {
                    name: tool.name().to_string(),
                });
            }
        }

        let mut allow: HashMap<AgentType, HashSet<String>> = HashMap::new();
        for (agent_type, names) in grants {
            if allow.contains_key(agent_type) {
                return Err(CapabilityError::DuplicateAgentType {
                    agent_type: agent_type.to_string(),
                });
            }
            let mut granted = HashSet::with_capacity(names.len());
            for name in names.iter() {
                if !index.contains_key(*name) {
                    return Err(CapabilityError::UndefinedTool {
                        agent_type: agent_type.to_string(),
                        tool: name.to_string(),
                    });
                }
                granted.insert(name.to_string());
            }
            allow.insert(*agent_type, granted);
        }

        if let Some(missing) = AgentType::ALL.iter().find(|t| !allow.contains_key(t)) {
            return Err(CapabilityError::MissingAgentType {
                agent_type: missing.to_string(),
            });
        }

        tracing::debug!(
            tools = tools.len(),
            agent_types = allow.len(),
            "Capability registry built"
        );

        Ok(Self {
            tools,
            index,
            grants: allow,
        })
    }

    /// Registry over the built-in catalog.
    pub fn builtin() -> Result<Self, CapabilityError> {
        Self::build(builtin_tools(), BUILTIN_GRANTS)
    }

    /// Definitions an agent type may use, in registry order.
    pub fn definitions_for(&self, agent_type: AgentType) -> Vec<&ToolDefinition> {
        let Some(granted) = self.grants.get(&agent_type) else {
            return Vec::new();
        };
        self.tools
            .iter()
            .filter(|tool| granted.contains(tool.name()))
            .map(|tool| &tool.definition)
            .collect()
    }

    /// Handler for a tool name, regardless of agent type.
    pub fn resolve(&self, tool_name: &str) -> Option<&ToolHandler> {
        self.index.get(tool_name).map(|&i| &self.tools[i].handler)
    }

    /// Whether `agent_type` is allowed to call `tool_name`.
    pub fn authorize(&self, agent_type: AgentType, tool_name: &str) -> bool {
        self.grants
            .get(&agent_type)
            .is_some_and(|granted| granted.contains(tool_name))
    }

    pub fn definition(&self, tool_name: &str) -> Option<&ToolDefinition> {
        self.index.get(tool_name).map(|&i| &self.tools[i].definition)
    }

    /// All tool names in registry order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}
