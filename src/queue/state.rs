//! Job state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::queue::job::{AttemptRecord, Job, JobOptions, JobPayload, LeaseInfo};
use crate::queue::policy::QueuePolicy;

/// Cap on per-job attempt history.
const MAX_ATTEMPT_RECORDS: usize = 50;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its delay to elapse or for a worker.
    Pending,
    /// Leased by a worker.
    Active,
    /// Handler succeeded.
    Completed,
    /// Attempts exhausted or terminal failure.
    Failed,
}

impl JobStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Active) |
            // retry, completion, terminal failure
            (Active, Pending) | (Active, Completed) | (Active, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// `now + d`, clamped instead of panicking on overflow.
pub(crate) fn later(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Job {
    /// Create a pending job with the queue's policy applied.
    pub fn new(
        name: impl Into<String>,
        payload: JobPayload,
        policy: &QueuePolicy,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            queue: payload.queue(),
            name: name.into(),
            payload,
            attempt: 1,
            max_attempts: policy.max_attempts.max(1),
            backoff: policy.backoff,
            priority: options.priority.unwrap_or(0),
            status: JobStatus::Pending,
            enqueued_at: now,
            delay_until: options.delay.map(|d| later(now, d)),
            last_attempt_at: None,
            finished_at: None,
            result: None,
            error: None,
            lease: None,
            attempts: Vec::new(),
        }
    }

    /// Earliest time the job may be leased.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.delay_until.unwrap_or(self.enqueued_at)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.ready_at() <= now
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active
            && self.lease.as_ref().is_some_and(|l| l.expires_at <= now)
    }

    /// Whether `token` is the lease currently held on this job.
    pub fn holds_lease(&self, token: &str) -> bool {
        self.status == JobStatus::Active && self.lease.as_ref().is_some_and(|l| l.token == token)
    }

    fn transition(&mut self, target: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// pending → active under a fresh lease.
    pub fn begin_attempt(
        &mut self,
        token: impl Into<String>,
        now: DateTime<Utc>,
        lease_window: Duration,
    ) -> Result<(), JobError> {
        self.transition(JobStatus::Active)?;
        self.lease = Some(LeaseInfo {
            token: token.into(),
            expires_at: later(now, lease_window),
        });
        self.last_attempt_at = Some(now);
        self.attempts.push(AttemptRecord {
            attempt: self.attempt,
            started_at: now,
            finished_at: None,
            error: None,
            retry_delay_ms: None,
        });
        if self.attempts.len() > MAX_ATTEMPT_RECORDS {
            let drain_count = self.attempts.len() - MAX_ATTEMPT_RECORDS;
            self.attempts.drain(..drain_count);
        }
        Ok(())
    }

    fn close_attempt(&mut self, now: DateTime<Utc>, error: Option<&str>, retry: Option<Duration>) {
        if let Some(record) = self.attempts.last_mut()
            && record.attempt == self.attempt
        {
            record.finished_at = Some(now);
            record.error = error.map(str::to_string);
            record.retry_delay_ms = retry.map(|d| d.as_millis() as u64);
        }
    }

    /// active → completed.
    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.close_attempt(now, None, None);
        self.lease = None;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Whether a retry is still within budget.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// active → pending with `attempt += 1`, ready after `delay`.
    pub fn retry(
        &mut self,
        error: &str,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        if !self.can_retry() {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: format!("attempt {}/{}", self.attempt, self.max_attempts),
                target: JobStatus::Pending.to_string(),
            });
        }
        self.transition(JobStatus::Pending)?;
        self.close_attempt(now, Some(error), Some(delay));
        self.lease = None;
        self.error = Some(error.to_string());
        self.attempt += 1;
        self.delay_until = Some(later(now, delay));
        Ok(())
    }

    /// active → failed. Permanent.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.close_attempt(now, Some(error), None);
        self.lease = None;
        self.error = Some(error.to_string());
        self.finished_at = Some(now);
        Ok(())
    }
}
