//! Error types for the orchestrator.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Backing store and queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Backing store unavailable")]
    Unavailable,

    #[error("Backing store command failed: {0}")]
    Store(String),

    #[error("Payload of kind {payload} does not belong on the {queue} queue")]
    PayloadMismatch { queue: String, payload: String },

    #[error("Lease on job {id} is no longer held (expired or already settled)")]
    LeaseLost { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Store(e.to_string())
    }
}

/// Job state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Job {id} handler timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },
}

/// Capability registry and tool gate errors.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Agent type {agent_type} is not permitted to call tool {tool}")]
    Forbidden { agent_type: String, tool: String },

    #[error("Tool {name} is not registered")]
    UnknownTool { name: String },

    #[error("Allow-list for {agent_type} references undefined tool {tool}")]
    UndefinedTool { agent_type: String, tool: String },

    #[error("Tool {name} is defined more than once")]
    DuplicateTool { name: String },

    #[error("No allow-list entry for agent type {agent_type}")]
    MissingAgentType { agent_type: String },

    #[error("Agent type {agent_type} has more than one allow-list entry")]
    DuplicateAgentType { agent_type: String },

    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

/// Webhook signing and delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the agent runtime when applying a lifecycle action.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Agent {0} not found")]
    NotFound(String),

    #[error("Invalid lifecycle request: {0}")]
    Invalid(String),

    #[error("Agent runtime unavailable: {0}")]
    Unavailable(String),
}

/// Notification channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to send: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Could not look up notification channels for user {user_id}: {reason}")]
    Lookup { user_id: String, reason: String },
}

/// Cache side-channel errors. Never surfaced past `cache::Cache`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Invalid cache pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}
