//! Alert queue handler: fan out to the alerting user's notification channels.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

use crate::notify::ChannelDirectory;
use crate::queue::{Job, JobFailure, JobPayload};
use crate::worker::handler::JobHandler;

pub struct AlertHandler {
    directory: Arc<dyn ChannelDirectory>,
}

impl AlertHandler {
    pub fn new(directory: Arc<dyn ChannelDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl JobHandler for AlertHandler {
    fn name(&self) -> &str {
        "alert"
    }

    /// Succeeds when at least one channel delivered, or when the user has
    /// none. Failing channels are logged and not retried on their own.
    async fn handle(&self, job: &Job) -> Result<Value, JobFailure> {
        let JobPayload::Alert(alert) = &job.payload else {
            return Err(JobFailure::terminal(format!(
                "alert handler cannot run {} payloads",
                job.payload.kind()
            )));
        };

        let channels = self
            .directory
            .channels_for(&alert.user_id)
            .await
            .map_err(|e| JobFailure::transient(e.to_string()))?;

        if channels.is_empty() {
            tracing::debug!(
                job_id = %job.id,
                user_id = %alert.user_id,
                alert_type = %alert.alert_type,
                "User has no notification channels, alert dropped"
            );
            return Ok(json!({ "delivered": [], "failed": [] }));
        }

        let results = join_all(channels.iter().map(|ch| ch.notify(alert))).await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (channel, result) in channels.iter().zip(results) {
            match result {
                Ok(()) => delivered.push(channel.name().to_string()),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        user_id = %alert.user_id,
                        channel = channel.name(),
                        alert_type = %alert.alert_type,
                        error = %e,
                        "Notification channel failed"
                    );
                    failed.push(channel.name().to_string());
                }
            }
        }

        if delivered.is_empty() {
            return Err(JobFailure::transient(format!(
                "all {} notification channels failed",
                failed.len()
            )));
        }
        Ok(json!({ "delivered": delivered, "failed": failed }))
    }
}
