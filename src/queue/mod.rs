//! Durable job queues.
//!
//! - `job`: job records, payloads, leases
//! - `state`: job state machine (Pending → Active → Completed/Failed)
//! - `policy`: per-queue retry, backoff, and retention policy
//! - `traits`: the `JobQueue` trait every adapter implements
//! - `memory` / `redis_backend` / `null`: adapters
//! - `producer`: best-effort scheduling API

pub mod clock;
pub mod job;
pub mod memory;
pub mod null;
pub mod policy;
pub mod producer;
pub mod redis_backend;
pub mod state;
pub mod traits;

pub use job::{
    AgentAction, AgentJob, AlertJob, FailureKind, Job, JobCounts, JobFailure, JobHandle,
    JobOptions, JobPayload, Lease, LeaseToken, NackOutcome, QueueName, WebhookJob,
};
pub use memory::InMemoryQueue;
pub use null::NullQueue;
pub use policy::{BackoffKind, BackoffPolicy, QueuePolicies, QueuePolicy, next_delay};
pub use producer::JobProducer;
pub use redis_backend::RedisQueue;
pub use state::JobStatus;
pub use traits::JobQueue;
