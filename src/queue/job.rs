//! Job records, payloads, and lease handles.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::policy::BackoffPolicy;
use crate::queue::state::JobStatus;

/// One of the three fixed queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Agent lifecycle transitions.
    Lifecycle,
    /// Outbound webhook deliveries.
    Webhook,
    /// Alert notifications.
    Alert,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Lifecycle, QueueName::Webhook, QueueName::Alert];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Webhook => "webhook",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lifecycle" => Ok(Self::Lifecycle),
            "webhook" => Ok(Self::Webhook),
            "alert" => Ok(Self::Alert),
            other => Err(format!("unknown queue: {other}")),
        }
    }
}

/// Lifecycle action requested for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentAction {
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent lifecycle transition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentJob {
    pub agent_id: String,
    pub user_id: String,
    pub action: AgentAction,
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub url: String,
    /// Delivered verbatim as the JSON request body.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// When present the request carries an HMAC-SHA256 signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Alert to fan out to a user's notification channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertJob {
    pub agent_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Closed union of job payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Agent(AgentJob),
    Webhook(WebhookJob),
    Alert(AlertJob),
}

impl JobPayload {
    /// The only queue this payload may be enqueued on.
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Agent(_) => QueueName::Lifecycle,
            Self::Webhook(_) => QueueName::Webhook,
            Self::Alert(_) => QueueName::Alert,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Webhook(_) => "webhook",
            Self::Alert(_) => "alert",
        }
    }
}

/// Per-job scheduling overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOptions {
    /// Do not lease before `now + delay`.
    pub delay: Option<Duration>,
    /// Higher values are leased first among ready jobs. Defaults to 0.
    pub priority: Option<u32>,
}

impl JobOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub queue: QueueName,
    pub name: String,
}

/// Lease currently held on an active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// One execution attempt, kept on the job for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Delay scheduled before the next attempt, when one was scheduled.
    pub retry_delay_ms: Option<u64>,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: QueueName,
    pub name: String,
    pub payload: JobPayload,
    /// 1-based number of the current (or next) attempt.
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub priority: u32,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub delay_until: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub lease: Option<LeaseInfo>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network, timeout, or infrastructure trouble.
    Transient,
    /// Retrying cannot succeed (unknown entity, rejected request).
    Terminal,
}

/// Outcome reported by a handler that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient: {}", self.message),
            FailureKind::Terminal => write!(f, "terminal: {}", self.message),
        }
    }
}

/// Proof of exclusive processing rights on one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub queue: QueueName,
    pub job_id: String,
    pub token: String,
}

/// A leased job together with the token needed to settle it.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: Job,
    pub token: LeaseToken,
}

/// What `nack` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Rescheduled as `attempt` after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Terminally failed and retained for inspection.
    Failed,
}

/// Per-status job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Ready to lease now.
    pub waiting: u64,
    /// Pending but not ready until their delay elapses.
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}
