//! Agent capabilities: which tools an agent type may call and how they resolve.

pub mod catalog;
pub mod gate;
pub mod registry;
pub mod tool;

pub use gate::{PluginLoader, ToolGate};
pub use registry::CapabilityRegistry;
pub use tool::{AgentType, RegisteredTool, ToolDefinition, ToolHandler};
