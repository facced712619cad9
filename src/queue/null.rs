//! Null-object queue used when no backing store is configured.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::queue::job::{
    Job, JobCounts, JobFailure, JobHandle, JobOptions, JobPayload, Lease, LeaseToken, NackOutcome,
    QueueName,
};
use crate::queue::traits::{JobQueue, check_payload};

/// Drops every job. Never errors on unavailability.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullQueue;

#[async_trait]
impl JobQueue for NullQueue {
    fn backend(&self) -> &'static str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn enqueue(
        &self,
        queue: QueueName,
        name: &str,
        payload: JobPayload,
        _options: JobOptions,
    ) -> Result<Option<JobHandle>, QueueError> {
        check_payload(queue, &payload)?;
        tracing::debug!(queue = %queue, job = %name, "No backing store, job dropped");
        Ok(None)
    }

    async fn lease(
        &self,
        _queue: QueueName,
        _lease_window: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        Ok(None)
    }

    async fn ack(&self, token: &LeaseToken, _result: serde_json::Value) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost {
            id: token.job_id.clone(),
        })
    }

    async fn nack(
        &self,
        token: &LeaseToken,
        _failure: &JobFailure,
    ) -> Result<NackOutcome, QueueError> {
        Err(QueueError::LeaseLost {
            id: token.job_id.clone(),
        })
    }

    async fn job(&self, _queue: QueueName, _id: &str) -> Result<Option<Job>, QueueError> {
        Ok(None)
    }

    async fn counts(&self, _queue: QueueName) -> Result<JobCounts, QueueError> {
        Ok(JobCounts::default())
    }

    async fn completed(&self, _queue: QueueName, _limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(Vec::new())
    }

    async fn failed(&self, _queue: QueueName, _limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(Vec::new())
    }
}
