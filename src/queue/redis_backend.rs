//! Redis-backed queue adapter.
//!
//! Layout per queue, under `{prefix}:{queue}:`:
//! - `jobs`      hash, job id → job JSON
//! - `prio`      hash, job id → priority (read by the lease script)
//! - `wait`      sorted set of pending ids, scored by ready time (ms)
//! - `active`    sorted set of leased ids, scored by lease expiry (ms)
//! - `completed` / `failed`  lists of terminal ids, newest first, capped
//!
//! Every move of an id between these sets is one script, so an id is never
//! in none of them. Expired leases go straight back to `wait`; the job
//! record catches up the next time the id is picked.
//!
//! Ids are UUIDv7, so equal scores fall back to creation order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::clock::{Clock, SystemClock};
use crate::queue::job::{
    Job, JobCounts, JobFailure, JobHandle, JobOptions, JobPayload, Lease, LeaseToken, NackOutcome,
    QueueName,
};
use crate::queue::policy::QueuePolicies;
use crate::queue::state::{JobStatus, later};
use crate::queue::traits::{JobQueue, apply_failure, check_payload, lease_expired_failure};

/// Ready candidates inspected per lease when picking by priority. A job
/// further back than this waits for its turn regardless of priority.
pub const LEASE_SCAN: usize = 32;

/// Move expired leases back to `wait`, then move the best ready id to
/// `active`. Returns `{picked or '', reclaimed count}`.
const LEASE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('ZADD', KEYS[1], ARGV[1], id)
end
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[3]))
if #ids == 0 then
  return {'', #expired}
end
local best = nil
local best_prio = -1
for _, id in ipairs(ids) do
  local p = tonumber(redis.call('HGET', KEYS[3], id) or '0') or 0
  if p > best_prio then
    best = id
    best_prio = p
  end
end
redis.call('ZREM', KEYS[1], best)
redis.call('ZADD', KEYS[2], ARGV[2], best)
return {best, #expired}
"#;

/// Write a job's next state and move it out of `active`, but only while the
/// stored record still holds the given lease and the id is still active.
const SETTLE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return 0
end
local job = cjson.decode(raw)
if job.status ~= 'active' or type(job.lease) ~= 'table' or job.lease.token ~= ARGV[2] then
  return 0
end
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
if ARGV[4] == 'wait' then
  redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
else
  redis.call('LPUSH', KEYS[3], ARGV[1])
end
return 1
"#;

const RETAIN_SCRIPT: &str = r#"
local cap = tonumber(ARGV[1])
local evicted = redis.call('LRANGE', KEYS[1], cap, -1)
if cap == 0 then
  redis.call('DEL', KEYS[1])
else
  redis.call('LTRIM', KEYS[1], 0, cap - 1)
end
for _, id in ipairs(evicted) do
  redis.call('HDEL', KEYS[2], id)
  redis.call('HDEL', KEYS[3], id)
end
return #evicted
"#;

struct Keys {
    jobs: String,
    prio: String,
    wait: String,
    active: String,
    completed: String,
    failed: String,
}

impl Keys {
    fn new(prefix: &str, queue: QueueName) -> Self {
        let base = format!("{prefix}:{queue}");
        Self {
            jobs: format!("{base}:jobs"),
            prio: format!("{base}:prio"),
            wait: format!("{base}:wait"),
            active: format!("{base}:active"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
        }
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Redis `JobQueue` adapter.
///
/// The connection is established lazily: until `probe` reaches the server
/// the adapter reports itself unavailable and drops enqueues.
pub struct RedisQueue {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    prefix: String,
    policies: QueuePolicies,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    lease_script: Script,
    settle_script: Script,
    retain_script: Script,
}

impl RedisQueue {
    /// Adapter for `url` that has not connected yet.
    pub fn new(
        url: &SecretString,
        prefix: impl Into<String>,
        policies: QueuePolicies,
    ) -> Result<Self, QueueError> {
        Self::with_clock(url, prefix, policies, Arc::new(SystemClock))
    }

    pub fn with_clock(
        url: &SecretString,
        prefix: impl Into<String>,
        policies: QueuePolicies,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(url.expose_secret())?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            prefix: prefix.into(),
            policies,
            clock,
            available: AtomicBool::new(false),
            lease_script: Script::new(LEASE_SCRIPT),
            settle_script: Script::new(SETTLE_SCRIPT),
            retain_script: Script::new(RETAIN_SCRIPT),
        })
    }

    /// Connect immediately. Fails when the server cannot be reached.
    pub async fn connect(
        url: &SecretString,
        prefix: impl Into<String>,
        policies: QueuePolicies,
    ) -> Result<Self, QueueError> {
        let queue = Self::new(url, prefix, policies)?;
        queue.establish().await?;
        queue.available.store(true, Ordering::Relaxed);
        Ok(queue)
    }

    async fn establish(&self) -> Result<(), QueueError> {
        self.conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        info!(prefix = %self.prefix, "Connected to Redis queue backend");
        Ok(())
    }

    fn keys(&self, queue: QueueName) -> Keys {
        Keys::new(&self.prefix, queue)
    }

    fn conn(&self) -> Result<ConnectionManager, QueueError> {
        self.conn.get().cloned().ok_or(QueueError::Unavailable)
    }

    /// Flip the availability flag off on connection-level failures.
    fn track<T>(&self, result: Result<T, RedisError>) -> Result<T, QueueError> {
        result.map_err(|e| {
            if e.is_io_error()
                || e.is_connection_dropped()
                || e.is_connection_refusal()
                || e.is_timeout()
            {
                if self.available.swap(false, Ordering::Relaxed) {
                    warn!(error = %e, "Redis unreachable, queue marked unavailable");
                }
                QueueError::Unavailable
            } else {
                QueueError::Store(e.to_string())
            }
        })
    }

    /// Connect if not connected yet, otherwise ping. Updates availability.
    pub async fn probe(&self) -> bool {
        let ok = match self.conn.get() {
            Some(conn) => {
                let mut conn = conn.clone();
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                    .is_ok()
            }
            None => match self.establish().await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Redis still unreachable");
                    false
                }
            },
        };
        let was = self.available.swap(ok, Ordering::Relaxed);
        if ok && !was {
            info!("Redis reachable, queue marked available");
        } else if !ok && was {
            warn!("Redis ping failed, queue marked unavailable");
        }
        ok
    }

    /// Periodically re-check availability.
    pub fn spawn_health_probe(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.probe().await;
            }
        })
    }

    async fn load(&self, keys: &Keys, id: &str) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn()?;
        let raw: Option<String> = self.track(conn.hget(&keys.jobs, id).await)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_many(&self, keys: &Keys, ids: &[String]) -> Result<Vec<Job>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let raw: Vec<Option<String>> = self.track(
            redis::cmd("HMGET")
                .arg(&keys.jobs)
                .arg(ids)
                .query_async(&mut conn)
                .await,
        )?;
        let mut jobs = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            jobs.push(serde_json::from_str(&json)?);
        }
        Ok(jobs)
    }

    /// Move a leased job to its next state in one step. `false` when the
    /// lease `token` no longer owns the job.
    async fn settle(&self, keys: &Keys, job: &Job, token: &str) -> Result<bool, QueueError> {
        let retention = self.policies.get(job.queue).retention;
        let (target, mode, score, cap) = match job.status {
            JobStatus::Pending => (&keys.wait, "wait", millis(job.ready_at()), None),
            JobStatus::Completed => (&keys.completed, "list", 0, Some(retention.completed)),
            _ => (&keys.failed, "list", 0, Some(retention.failed)),
        };
        let json = serde_json::to_string(job)?;
        let mut conn = self.conn()?;
        let applied: i64 = self.track(
            self.settle_script
                .key(&keys.jobs)
                .key(&keys.active)
                .key(target)
                .arg(&job.id)
                .arg(token)
                .arg(json)
                .arg(mode)
                .arg(score)
                .invoke_async(&mut conn)
                .await,
        )?;
        if applied == 0 {
            return Ok(false);
        }
        if let Some(cap) = cap {
            let evicted: i64 = self.track(
                self.retain_script
                    .key(target)
                    .key(&keys.jobs)
                    .key(&keys.prio)
                    .arg(cap)
                    .invoke_async(&mut conn)
                    .await,
            )?;
            if evicted > 0 {
                debug!(queue = %job.queue, evicted, "Evicted retained jobs");
            }
        }
        Ok(true)
    }

    /// Load the job behind `token`, failing if the lease is no longer held.
    async fn held(&self, keys: &Keys, token: &LeaseToken) -> Result<Job, QueueError> {
        self.load(keys, &token.job_id)
            .await?
            .filter(|j| j.holds_lease(&token.token))
            .ok_or_else(|| QueueError::LeaseLost {
                id: token.job_id.clone(),
            })
    }

    /// Bring a picked id's record up to date. `Some` when the job can be
    /// handed to a worker, `None` when it was rescheduled or dropped.
    async fn claim(
        &self,
        queue: QueueName,
        keys: &Keys,
        id: &str,
        now: DateTime<Utc>,
        lease_window: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        let job = match self.load(keys, id).await {
            Ok(job) => job,
            Err(QueueError::Serialization(e)) => {
                error!(queue = %queue, job_id = %id, error = %e, "Unreadable job record, dropping id");
                self.forget(keys, id).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(mut job) = job else {
            warn!(queue = %queue, job_id = %id, "Leased id has no job record, dropping");
            self.forget(keys, id).await?;
            return Ok(None);
        };

        match job.status {
            JobStatus::Pending => {}
            JobStatus::Active => {
                // Lease ran out before the job was settled.
                let stale = job.lease.as_ref().map(|l| l.token.clone()).unwrap_or_default();
                info!(queue = %queue, job_id = %id, attempt = job.attempt, "Reclaiming expired lease");
                apply_failure(
                    &mut job,
                    &lease_expired_failure(),
                    self.policies.get(queue),
                    now,
                )?;
                if !self.settle(keys, &job, &stale).await? {
                    warn!(queue = %queue, job_id = %id, "Expired lease changed hands during reclaim");
                }
                return Ok(None);
            }
            JobStatus::Completed | JobStatus::Failed => {
                warn!(queue = %queue, job_id = %id, status = %job.status, "Settled job found in ready set, dropping id");
                self.forget(keys, id).await?;
                return Ok(None);
            }
        }

        let token = Uuid::new_v4().to_string();
        job.begin_attempt(token.clone(), now, lease_window)?;
        let json = serde_json::to_string(&job)?;
        let mut conn = self.conn()?;
        let _: i64 = self.track(conn.hset(&keys.jobs, id, json).await)?;
        debug!(queue = %queue, job_id = %id, attempt = job.attempt, "Leased job");

        Ok(Some(Lease {
            job,
            token: LeaseToken {
                queue,
                job_id: id.to_string(),
                token,
            },
        }))
    }

    async fn forget(&self, keys: &Keys, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let _: i64 = self.track(conn.zrem(&keys.active, id).await)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    fn backend(&self) -> &'static str {
        "redis"
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
        let Ok(mut conn) = self.conn() else {
            return Ok(None);
        };

        let job = Job::new(
            name,
            payload,
            self.policies.get(queue),
            &options,
            self.clock.now(),
        );
        let keys = self.keys(queue);
        let json = serde_json::to_string(&job)?;
        let stored = self.track(
            redis::pipe()
                .atomic()
                .hset(&keys.jobs, &job.id, json)
                .ignore()
                .hset(&keys.prio, &job.id, job.priority)
                .ignore()
                .zadd(&keys.wait, &job.id, millis(job.ready_at()))
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await,
        );
        match stored {
            Ok(()) => Ok(Some(JobHandle {
                id: job.id,
                queue,
                name: job.name,
            })),
            Err(QueueError::Unavailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn lease(
        &self,
        queue: QueueName,
        lease_window: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        if !self.is_available() {
            return Ok(None);
        }
        let keys = self.keys(queue);
        let mut conn = self.conn()?;

        for _ in 0..LEASE_SCAN {
            let now = self.clock.now();
            let (picked, reclaimed): (String, i64) = self.track(
                self.lease_script
                    .key(&keys.wait)
                    .key(&keys.active)
                    .key(&keys.prio)
                    .arg(millis(now))
                    .arg(millis(later(now, lease_window)))
                    .arg(LEASE_SCAN)
                    .invoke_async(&mut conn)
                    .await,
            )?;
            if reclaimed > 0 {
                info!(queue = %queue, reclaimed, "Expired leases returned to the ready set");
            }
            if picked.is_empty() {
                return Ok(None);
            }
            if let Some(lease) = self.claim(queue, &keys, &picked, now, lease_window).await? {
                return Ok(Some(lease));
            }
        }
        Ok(None)
    }

    async fn ack(&self, token: &LeaseToken, result: serde_json::Value) -> Result<(), QueueError> {
        let keys = self.keys(token.queue);
        let mut job = self.held(&keys, token).await?;
        job.complete(result, self.clock.now())?;
        if !self.settle(&keys, &job, &token.token).await? {
            return Err(QueueError::LeaseLost {
                id: token.job_id.clone(),
            });
        }
        info!(queue = %token.queue, job_id = %job.id, attempt = job.attempt, "Job completed");
        Ok(())
    }

    async fn nack(
        &self,
        token: &LeaseToken,
        failure: &JobFailure,
    ) -> Result<NackOutcome, QueueError> {
        let keys = self.keys(token.queue);
        let mut job = self.held(&keys, token).await?;
        let policy = self.policies.get(token.queue);
        let outcome = apply_failure(&mut job, failure, policy, self.clock.now())?;
        if !self.settle(&keys, &job, &token.token).await? {
            return Err(QueueError::LeaseLost {
                id: token.job_id.clone(),
            });
        }
        Ok(outcome)
    }

    async fn job(&self, queue: QueueName, id: &str) -> Result<Option<Job>, QueueError> {
        self.load(&self.keys(queue), id).await
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError> {
        let keys = self.keys(queue);
        let now = millis(self.clock.now());
        let mut conn = self.conn()?;
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = self
            .track(
                redis::pipe()
                    .zcount(&keys.wait, "-inf", now)
                    .zcount(&keys.wait, format!("({now}"), "+inf")
                    .zcard(&keys.active)
                    .llen(&keys.completed)
                    .llen(&keys.failed)
                    .query_async(&mut conn)
                    .await,
            )?;
        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn completed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);
        let mut conn = self.conn()?;
        let ids: Vec<String> =
            self.track(conn.lrange(&keys.completed, 0, limit as isize - 1).await)?;
        self.load_many(&keys, &ids).await
    }

    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);
        let mut conn = self.conn()?;
        let ids: Vec<String> = self.track(conn.lrange(&keys.failed, 0, limit as isize - 1).await)?;
        self.load_many(&keys, &ids).await
    }
}
