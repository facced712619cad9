//! Worker pool: consumer loops that lease, run, and settle jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{JobError, QueueError};
use crate::queue::{JobFailure, JobQueue, Lease, NackOutcome, QueueName};
use crate::worker::handler::{JobHandler, JobOutcome};

/// Tuning for one queue's pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of consumer loops. Each holds at most one lease.
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty or the store is down.
    pub poll_interval: Duration,
    /// How long a lease lasts before the job becomes eligible for redelivery.
    pub lease_window: Duration,
    /// Handler deadline. Must be shorter than `lease_window`.
    pub handler_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            lease_window: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Consumers for a single queue.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        queue_name: QueueName,
        handler: Arc<dyn JobHandler>,
        mut config: WorkerConfig,
    ) -> Self {
        if config.handler_timeout >= config.lease_window {
            tracing::warn!(
                queue = %queue_name,
                handler_timeout_ms = config.handler_timeout.as_millis() as u64,
                lease_window_ms = config.lease_window.as_millis() as u64,
                "Handler timeout not shorter than lease window, clamping"
            );
            config.handler_timeout = config.lease_window.mul_f64(0.9);
        }
        Self {
            queue,
            queue_name,
            handler,
            config,
        }
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue_name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Lease one job, run the handler, and settle the lease.
    ///
    /// `Ok(None)` when nothing is ready.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        let Some(lease) = self
            .queue
            .lease(self.queue_name, self.config.lease_window)
            .await?
        else {
            return Ok(None);
        };

        let Lease { job, token } = lease;
        tracing::debug!(
            queue = %self.queue_name,
            job_id = %job.id,
            name = %job.name,
            attempt = job.attempt,
            handler = self.handler.name(),
            "Job leased"
        );

        let started = Instant::now();
        let run = AssertUnwindSafe(self.handler.handle(&job)).catch_unwind();
        let result = match tokio::time::timeout(self.config.handler_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(JobFailure::transient("handler panicked")),
            Err(_) => Err(JobFailure::transient(
                JobError::Timeout {
                    id: job.id.clone(),
                    timeout: self.config.handler_timeout,
                }
                .to_string(),
            )),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => match self.queue.ack(&token, value).await {
                Ok(()) => {
                    tracing::info!(
                        queue = %self.queue_name,
                        job_id = %job.id,
                        name = %job.name,
                        attempt = job.attempt,
                        elapsed_ms,
                        "Job completed"
                    );
                    Ok(Some(JobOutcome::Completed {
                        job_id: job.id,
                        attempt: job.attempt,
                    }))
                }
                Err(QueueError::LeaseLost { id }) => {
                    tracing::warn!(
                        queue = %self.queue_name,
                        job_id = %id,
                        elapsed_ms,
                        "Lease lost before ack, result discarded"
                    );
                    Ok(Some(JobOutcome::LeaseLost { job_id: id }))
                }
                Err(e) => Err(e),
            },
            Err(failure) => match self.queue.nack(&token, &failure).await {
                Ok(NackOutcome::Retrying { attempt, delay }) => Ok(Some(JobOutcome::Retrying {
                    job_id: job.id,
                    next_attempt: attempt,
                    delay,
                })),
                Ok(NackOutcome::Failed) => Ok(Some(JobOutcome::Failed {
                    job_id: job.id,
                    attempt: job.attempt,
                    error: failure.message,
                })),
                Err(QueueError::LeaseLost { id }) => {
                    tracing::warn!(
                        queue = %self.queue_name,
                        job_id = %id,
                        error = %failure,
                        "Lease lost before nack"
                    );
                    Ok(Some(JobOutcome::LeaseLost { job_id: id }))
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Start `concurrency` consumer loops. They exit once `shutdown` reads `true`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.consume(worker, shutdown).await })
            })
            .collect()
    }

    async fn consume(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(queue = %self.queue_name, worker, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = if !self.queue.is_available() {
                true
            } else {
                match self.run_once().await {
                    Ok(Some(_)) => false,
                    Ok(None) => true,
                    Err(QueueError::Unavailable) => true,
                    Err(e) => {
                        tracing::warn!(
                            queue = %self.queue_name,
                            worker,
                            error = %e,
                            "Worker iteration failed"
                        );
                        true
                    }
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!(queue = %self.queue_name, worker, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::queue::clock::ManualClock;
    use crate::queue::{
        AlertJob, InMemoryQueue, Job, JobOptions, JobPayload, JobStatus, QueuePolicies,
    };

    /// Fails with the queued failures, then succeeds.
    struct ScriptedHandler {
        failures: Mutex<Vec<JobFailure>>,
        calls: AtomicU32,
    }

    impl ScriptedHandler {
        fn new(failures: Vec<JobFailure>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(&self, job: &Job) -> Result<Value, JobFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut failures = self.failures.lock().unwrap();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            };
            match next {
                Some(failure) => Err(failure),
                None => Ok(json!({ "attempt": job.attempt })),
            }
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, _job: &Job) -> Result<Value, JobFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn handle(&self, _job: &Job) -> Result<Value, JobFailure> {
            panic!("boom");
        }
    }

    fn alert() -> JobPayload {
        JobPayload::Alert(AlertJob {
            agent_id: "agent-1".into(),
            user_id: "user-1".into(),
            alert_type: "balance_low".into(),
            message: "Balance below threshold".into(),
            data: None,
        })
    }

    fn queue_with_clock() -> (Arc<InMemoryQueue>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(InMemoryQueue::with_clock(
            QueuePolicies::default().without_jitter(),
            clock.clone(),
        ));
        (queue, clock)
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
            lease_window: Duration::from_secs(10),
            handler_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn run_once_on_empty_queue_is_none() {
        let (queue, _) = queue_with_clock();
        let pool = WorkerPool::new(
            queue,
            QueueName::Alert,
            Arc::new(ScriptedHandler::new(vec![])),
            config(),
        );
        assert!(pool.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn success_acks_with_handler_result() {
        let (queue, _) = queue_with_clock();
        let handle = queue
            .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
            .await
            .unwrap()
            .unwrap();
        let pool = WorkerPool::new(
            queue.clone(),
            QueueName::Alert,
            Arc::new(ScriptedHandler::new(vec![])),
            config(),
        );

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                job_id: handle.id.clone(),
                attempt: 1
            }
        );
        let job = queue.job(QueueName::Alert, &handle.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({ "attempt": 1 })));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_after_backoff() {
        let (queue, clock) = queue_with_clock();
        queue
            .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
            .await
            .unwrap();
        let handler = Arc::new(ScriptedHandler::new(vec![JobFailure::transient("smtp down")]));
        let pool = WorkerPool::new(queue.clone(), QueueName::Alert, handler.clone(), config());

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Retrying { next_attempt: 2, delay, .. } if delay == Duration::from_millis(1000)
        ));

        // Not ready until the backoff elapses.
        assert!(pool.run_once().await.unwrap().is_none());
        clock.advance(Duration::from_millis(1000));
        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Completed { attempt: 2, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_failure_short_circuits() {
        let (queue, _) = queue_with_clock();
        queue
            .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
            .await
            .unwrap();
        let pool = WorkerPool::new(
            queue.clone(),
            QueueName::Alert,
            Arc::new(ScriptedHandler::new(vec![JobFailure::terminal("no such user")])),
            config(),
        );

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempt: 1, .. }));
        assert!(pool.run_once().await.unwrap().is_none());
        assert_eq!(queue.counts(QueueName::Alert).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn handler_timeout_is_transient() {
        let (queue, _) = queue_with_clock();
        queue
            .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
            .await
            .unwrap();
        let mut cfg = config();
        cfg.handler_timeout = Duration::from_millis(20);
        let pool = WorkerPool::new(queue, QueueName::Alert, Arc::new(SlowHandler), cfg);

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Retrying { next_attempt: 2, .. }));
    }

    #[tokio::test]
    async fn handler_panic_is_transient() {
        let (queue, _) = queue_with_clock();
        queue
            .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
            .await
            .unwrap();
        let pool = WorkerPool::new(queue, QueueName::Alert, Arc::new(PanickingHandler), config());

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Retrying { .. }));
    }

    #[test]
    fn handler_timeout_is_clamped_below_lease_window() {
        let (queue, _) = queue_with_clock();
        let cfg = WorkerConfig {
            lease_window: Duration::from_secs(10),
            handler_timeout: Duration::from_secs(30),
            ..config()
        };
        let pool = WorkerPool::new(queue, QueueName::Alert, Arc::new(SlowHandler), cfg);
        assert!(pool.config().handler_timeout < pool.config().lease_window);
    }

    #[tokio::test]
    async fn spawned_workers_drain_and_stop_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        for _ in 0..5 {
            queue
                .enqueue(QueueName::Alert, "alert:balance_low", alert(), JobOptions::default())
                .await
                .unwrap();
        }
        let handler = Arc::new(ScriptedHandler::new(vec![]));
        let mut cfg = config();
        cfg.concurrency = 3;
        let pool = WorkerPool::new(queue.clone(), QueueName::Alert, handler.clone(), cfg);

        let (tx, rx) = watch::channel(false);
        let handles = pool.spawn(rx);
        assert_eq!(handles.len(), 3);

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.counts(QueueName::Alert).await.unwrap().completed < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workers did not drain the queue");

        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }
}
