//! Job handler trait and per-job outcomes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::queue::{Job, JobFailure};

/// Executes one leased job.
///
/// `Ok` acks the job with the returned value as its result. A transient
/// failure is retried within the queue's budget; a terminal one fails the
/// job on the spot.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &str;

    async fn handle(&self, job: &Job) -> Result<Value, JobFailure>;
}

/// What happened to a job after one `WorkerPool::run_once`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        job_id: String,
        attempt: u32,
    },
    Retrying {
        job_id: String,
        next_attempt: u32,
        delay: Duration,
    },
    Failed {
        job_id: String,
        attempt: u32,
        error: String,
    },
    /// The lease ran out before the job was settled; another worker owns it now.
    LeaseLost {
        job_id: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::LeaseLost { job_id } => job_id,
        }
    }
}
