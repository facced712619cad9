//! In-process queue adapter.
//!
//! Same semantics as the Redis adapter, held in memory behind one mutex.
//! Jobs do not survive a restart; used for tests and single-process setups.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::clock::{Clock, SystemClock};
use crate::queue::job::{
    Job, JobCounts, JobFailure, JobHandle, JobOptions, JobPayload, Lease, LeaseToken, NackOutcome,
    QueueName,
};
use crate::queue::policy::{QueuePolicies, RetentionPolicy};
use crate::queue::state::JobStatus;
use crate::queue::traits::{JobQueue, apply_failure, check_payload, lease_expired_failure};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    /// Insertion sequence, breaks ties between equally ready jobs.
    seq: HashMap<String, u64>,
    /// Retained terminal ids, oldest at the front.
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

impl QueueState {
    fn retain_terminal(&mut self, id: String, status: JobStatus, retention: RetentionPolicy) {
        let (list, cap) = match status {
            JobStatus::Completed => (&mut self.completed, retention.completed),
            _ => (&mut self.failed, retention.failed),
        };
        list.push_back(id);
        let mut evicted = Vec::new();
        while list.len() > cap {
            if let Some(old) = list.pop_front() {
                evicted.push(old);
            }
        }
        for old in evicted {
            self.jobs.remove(&old);
            self.seq.remove(&old);
            debug!(job_id = %old, "Evicted retained job");
        }
    }

    fn newest(&self, list: &VecDeque<String>, limit: usize) -> Vec<Job> {
        list.iter()
            .rev()
            .filter_map(|id| self.jobs.get(id))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// In-memory `JobQueue`.
pub struct InMemoryQueue {
    policies: QueuePolicies,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    next_seq: AtomicU64,
    queues: Mutex<HashMap<QueueName, QueueState>>,
}

impl InMemoryQueue {
    /// Create a queue with default policies and the system clock.
    pub fn new() -> Self {
        Self::with_clock(QueuePolicies::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(policies: QueuePolicies, clock: Arc<dyn Clock>) -> Self {
        Self {
            policies,
            clock,
            available: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Simulate the backing store going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn settle(&self, token: &LeaseToken) -> Result<(), QueueError> {
        if !self.is_available() {
            return Err(QueueError::Unavailable);
        }
        debug!(queue = %token.queue, job_id = %token.job_id, "Settling lease");
        Ok(())
    }

    /// Reclaim active jobs whose lease ran out.
    fn reclaim_expired(&self, queue: QueueName, state: &mut QueueState) {
        let now = self.clock.now();
        let policy = self.policies.get(queue);
        let expired: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.is_lease_expired(now))
            .map(|j| j.id.clone())
            .collect();

        for id in expired {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            info!(queue = %queue, job_id = %id, attempt = job.attempt, "Reclaiming expired lease");
            match apply_failure(job, &lease_expired_failure(), policy, now) {
                Ok(NackOutcome::Failed) => {
                    state.retain_terminal(id, JobStatus::Failed, policy.retention)
                }
                Ok(NackOutcome::Retrying { .. }) => {}
                Err(e) => tracing::error!(job_id = %id, error = %e, "Failed to reclaim lease"),
            }
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn enqueue(
        &self,
        queue: QueueName,
        name: &str,
        payload: JobPayload,
        options: JobOptions,
    ) -> Result<Option<JobHandle>, QueueError> {
        check_payload(queue, &payload)?;
        if !self.is_available() {
            return Ok(None);
        }

        let job = Job::new(name, payload, self.policies.get(queue), &options, self.clock.now());
        let handle = JobHandle {
            id: job.id.clone(),
            queue,
            name: job.name.clone(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();
        state.seq.insert(job.id.clone(), seq);
        state.jobs.insert(job.id.clone(), job);
        Ok(Some(handle))
    }

    async fn lease(
        &self,
        queue: QueueName,
        lease_window: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        if !self.is_available() {
            return Ok(None);
        }

        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();
        self.reclaim_expired(queue, state);

        let now = self.clock.now();
        let next = state
            .jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| {
                (
                    std::cmp::Reverse(j.priority),
                    j.ready_at(),
                    state.seq.get(&j.id).copied().unwrap_or(u64::MAX),
                )
            })
            .map(|j| j.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };

        let token = Uuid::new_v4().to_string();
        job.begin_attempt(token.clone(), now, lease_window)?;
        debug!(queue = %queue, job_id = %id, attempt = job.attempt, "Leased job");

        Ok(Some(Lease {
            job: job.clone(),
            token: LeaseToken {
                queue,
                job_id: id,
                token,
            },
        }))
    }

    async fn ack(&self, token: &LeaseToken, result: serde_json::Value) -> Result<(), QueueError> {
        self.settle(token)?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(token.queue).or_default();
        let job = state
            .jobs
            .get_mut(&token.job_id)
            .filter(|j| j.holds_lease(&token.token))
            .ok_or_else(|| QueueError::LeaseLost {
                id: token.job_id.clone(),
            })?;

        job.complete(result, self.clock.now())?;
        info!(queue = %token.queue, job_id = %token.job_id, attempt = job.attempt, "Job completed");
        let retention = self.policies.get(token.queue).retention;
        state.retain_terminal(token.job_id.clone(), JobStatus::Completed, retention);
        Ok(())
    }

    async fn nack(
        &self,
        token: &LeaseToken,
        failure: &JobFailure,
    ) -> Result<NackOutcome, QueueError> {
        self.settle(token)?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(token.queue).or_default();
        let job = state
            .jobs
            .get_mut(&token.job_id)
            .filter(|j| j.holds_lease(&token.token))
            .ok_or_else(|| QueueError::LeaseLost {
                id: token.job_id.clone(),
            })?;

        let policy = self.policies.get(token.queue);
        let outcome = apply_failure(job, failure, policy, self.clock.now())?;
        if outcome == NackOutcome::Failed {
            state.retain_terminal(token.job_id.clone(), JobStatus::Failed, policy.retention);
        }
        Ok(outcome)
    }

    async fn job(&self, queue: QueueName, id: &str) -> Result<Option<Job>, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&queue).and_then(|s| s.jobs.get(id)).cloned())
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError> {
        let now = self.clock.now();
        let queues = self.queues.lock().await;
        let mut counts = JobCounts::default();
        if let Some(state) = queues.get(&queue) {
            for job in state.jobs.values() {
                match job.status {
                    JobStatus::Pending if job.is_ready(now) => counts.waiting += 1,
                    JobStatus::Pending => counts.delayed += 1,
                    JobStatus::Active => counts.active += 1,
                    JobStatus::Completed => counts.completed += 1,
                    JobStatus::Failed => counts.failed += 1,
                }
            }
        }
        Ok(counts)
    }

    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue)
            .map(|s| s.newest(&s.completed, limit))
            .unwrap_or_default())
    }

    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue)
            .map(|s| s.newest(&s.failed, limit))
            .unwrap_or_default())
    }
}
