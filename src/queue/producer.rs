//! Job producer: the platform-facing scheduling API.
//!
//! Every call is best-effort: validation failures, an unavailable store, and
//! store errors are logged and come back as `None`. Nothing here can fail
//! the caller's own operation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::JobError;
use crate::queue::job::{AgentJob, AlertJob, JobHandle, JobOptions, JobPayload, QueueName, WebhookJob};
use crate::queue::traits::JobQueue;

/// Validates payloads and appends them to the right queue.
#[derive(Clone)]
pub struct JobProducer {
    queue: Arc<dyn JobQueue>,
}

impl JobProducer {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Schedule a lifecycle transition, optionally delayed.
    pub async fn schedule_agent_job(&self, job: AgentJob, delay_ms: Option<u64>) -> Option<JobHandle> {
        let name = format!("agent:{}", job.action);
        let options = JobOptions {
            delay: delay_ms.map(Duration::from_millis),
            ..Default::default()
        };
        self.schedule(QueueName::Lifecycle, &name, JobPayload::Agent(job), options)
            .await
    }

    /// Schedule a webhook delivery.
    pub async fn schedule_webhook(&self, job: WebhookJob) -> Option<JobHandle> {
        self.schedule(
            QueueName::Webhook,
            "webhook:deliver",
            JobPayload::Webhook(job),
            JobOptions::default(),
        )
        .await
    }

    /// Schedule an alert fan-out.
    pub async fn schedule_alert(&self, job: AlertJob) -> Option<JobHandle> {
        let name = format!("alert:{}", job.alert_type);
        self.schedule(QueueName::Alert, &name, JobPayload::Alert(job), JobOptions::default())
            .await
    }

    /// Validate and enqueue any payload.
    pub async fn schedule(
        &self,
        queue: QueueName,
        name: &str,
        payload: JobPayload,
        options: JobOptions,
    ) -> Option<JobHandle> {
        if let Err(e) = validate(&payload) {
            warn!(queue = %queue, job = %name, error = %e, "Rejected job payload");
            return None;
        }

        if !self.queue.is_available() {
            debug!(
                queue = %queue,
                job = %name,
                backend = self.queue.backend(),
                "Backing store unavailable, job not scheduled"
            );
            return None;
        }

        match self.queue.enqueue(queue, name, payload, options).await {
            Ok(Some(handle)) => {
                debug!(queue = %queue, job = %name, job_id = %handle.id, "Job scheduled");
                Some(handle)
            }
            Ok(None) => {
                debug!(queue = %queue, job = %name, "Job not scheduled");
                None
            }
            Err(e) => {
                warn!(queue = %queue, job = %name, error = %e, "Failed to schedule job");
                None
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), JobError> {
    if value.trim().is_empty() {
        return Err(JobError::InvalidPayload(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Shape checks that do not need the backing store.
pub fn validate(payload: &JobPayload) -> Result<(), JobError> {
    match payload {
        JobPayload::Agent(job) => {
            require("agent_id", &job.agent_id)?;
            require("user_id", &job.user_id)
        }
        JobPayload::Webhook(job) => {
            let url = reqwest::Url::parse(&job.url)
                .map_err(|e| JobError::InvalidPayload(format!("url {}: {e}", job.url)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(JobError::InvalidPayload(format!(
                    "url scheme {} is not http(s)",
                    url.scheme()
                )));
            }
            if let Some(secret) = &job.secret {
                require("secret", secret)?;
            }
            Ok(())
        }
        JobPayload::Alert(job) => {
            require("agent_id", &job.agent_id)?;
            require("user_id", &job.user_id)?;
            require("type", &job.alert_type)?;
            require("message", &job.message)
        }
    }
}
