//! Backend-agnostic `JobQueue` trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{JobError, QueueError};
use crate::queue::job::{
    Job, JobCounts, JobFailure, JobHandle, JobOptions, JobPayload, Lease, LeaseToken, NackOutcome,
    QueueName,
};
use crate::queue::policy::QueuePolicy;

/// Durable job queue over some backing store.
///
/// Adapters agree on: FIFO among ready jobs of equal priority, delayed jobs
/// never leased early, expired leases reclaimed as a failed attempt, terminal
/// jobs kept on bounded lists.
///
/// Priority is exact for `InMemoryQueue`. `RedisQueue` only weighs the
/// earliest [`LEASE_SCAN`](crate::queue::redis_backend::LEASE_SCAN) ready
/// jobs, so a high-priority job further back waits until it is among them.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Whether the backing store is currently reachable.
    fn is_available(&self) -> bool;

    /// Append a job. `Ok(None)` when the backing store is unavailable.
    async fn enqueue(
        &self,
        queue: QueueName,
        name: &str,
        payload: JobPayload,
        options: JobOptions,
    ) -> Result<Option<JobHandle>, QueueError>;

    /// Lease the next ready job for `lease_window`.
    async fn lease(
        &self,
        queue: QueueName,
        lease_window: Duration,
    ) -> Result<Option<Lease>, QueueError>;

    /// Mark the leased job completed.
    async fn ack(&self, token: &LeaseToken, result: serde_json::Value) -> Result<(), QueueError>;

    /// Report a failed attempt on the leased job.
    async fn nack(
        &self,
        token: &LeaseToken,
        failure: &JobFailure,
    ) -> Result<NackOutcome, QueueError>;

    /// Look up a job that is still retained.
    async fn job(&self, queue: QueueName, id: &str) -> Result<Option<Job>, QueueError>;

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError>;

    /// Retained completed jobs, newest first.
    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Retained failed jobs, newest first.
    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError>;
}

/// Reject payloads that belong on another queue.
pub(crate) fn check_payload(queue: QueueName, payload: &JobPayload) -> Result<(), QueueError> {
    if payload.queue() != queue {
        return Err(QueueError::PayloadMismatch {
            queue: queue.to_string(),
            payload: payload.kind().to_string(),
        });
    }
    Ok(())
}

/// Apply a failed attempt to an active job: retry within budget, otherwise fail.
pub(crate) fn apply_failure(
    job: &mut Job,
    failure: &JobFailure,
    policy: &QueuePolicy,
    now: DateTime<Utc>,
) -> Result<NackOutcome, JobError> {
    if failure.is_retryable() && job.can_retry() {
        let delay = policy.retry_delay(job.attempt);
        job.retry(&failure.message, delay, now)?;
        tracing::info!(
            queue = %job.queue,
            job_id = %job.id,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure.message,
            "Job attempt failed, retry scheduled"
        );
        Ok(NackOutcome::Retrying {
            attempt: job.attempt,
            delay,
        })
    } else {
        job.fail(&failure.message, now)?;
        tracing::warn!(
            queue = %job.queue,
            job_id = %job.id,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            terminal = !failure.is_retryable(),
            error = %failure.message,
            "Job failed permanently"
        );
        Ok(NackOutcome::Failed)
    }
}

/// Failure recorded against a job whose lease ran out.
pub(crate) fn lease_expired_failure() -> JobFailure {
    JobFailure::transient("lease expired before the job was settled")
}
