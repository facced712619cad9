//! Per-queue retry and retention policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::queue::job::QueueName;

/// Share of the computed delay added as random jitter, at most.
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Shape of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Backoff settings carried on every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl BackoffPolicy {
    pub const fn exponential(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
        }
    }

    pub const fn fixed(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
        }
    }
}

/// Delay before retrying after attempt number `attempt` (1-based) failed.
///
/// Exponential: `base * 2^(attempt-1)`. Fixed: `base`. Saturates instead of
/// overflowing.
pub fn next_delay(attempt: u32, policy: &BackoffPolicy) -> Duration {
    let attempt = attempt.max(1);
    let ms = match policy.kind {
        BackoffKind::Fixed => policy.base_delay_ms,
        BackoffKind::Exponential => {
            let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
            policy.base_delay_ms.saturating_mul(factor)
        }
    };
    Duration::from_millis(ms)
}

/// Add up to `ratio * delay` of random jitter.
///
/// `ratio` is clamped to `[0, 1]`, which keeps exponential sequences
/// non-decreasing: the smallest next delay (2d) is never below the largest
/// jittered current one (2d at ratio 1).
pub fn with_jitter(delay: Duration, ratio: f64) -> Duration {
    let ratio = ratio.clamp(0.0, 1.0);
    let max_extra = (delay.as_millis() as f64 * ratio) as u64;
    if max_extra == 0 {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=max_extra);
    delay + Duration::from_millis(extra)
}

/// How many terminal jobs a queue keeps for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub completed: usize,
    pub failed: usize,
}

/// Authoritative policy for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    pub jitter_ratio: f64,
}

impl QueuePolicy {
    /// Default policy for each queue.
    pub fn for_queue(queue: QueueName) -> Self {
        match queue {
            QueueName::Lifecycle => Self {
                max_attempts: 3,
                backoff: BackoffPolicy::exponential(1000),
                retention: RetentionPolicy {
                    completed: 100,
                    failed: 50,
                },
                jitter_ratio: DEFAULT_JITTER_RATIO,
            },
            QueueName::Webhook => Self {
                max_attempts: 5,
                backoff: BackoffPolicy::exponential(2000),
                retention: RetentionPolicy {
                    completed: 1000,
                    failed: 100,
                },
                jitter_ratio: DEFAULT_JITTER_RATIO,
            },
            QueueName::Alert => Self {
                max_attempts: 3,
                backoff: BackoffPolicy::exponential(1000),
                retention: RetentionPolicy {
                    completed: 500,
                    failed: 100,
                },
                jitter_ratio: DEFAULT_JITTER_RATIO,
            },
        }
    }

    /// Same policy with a different jitter ratio, clamped to `0.0..=1.0`.
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Same policy without jitter, for deterministic schedules.
    pub fn without_jitter(self) -> Self {
        self.with_jitter_ratio(0.0)
    }

    /// Delay to apply after `attempt` failed, jitter included.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        with_jitter(next_delay(attempt, &self.backoff), self.jitter_ratio)
    }
}

/// Policies for all three queues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueuePolicies {
    pub lifecycle: QueuePolicy,
    pub webhook: QueuePolicy,
    pub alert: QueuePolicy,
}

impl QueuePolicies {
    pub fn get(&self, queue: QueueName) -> &QueuePolicy {
        match queue {
            QueueName::Lifecycle => &self.lifecycle,
            QueueName::Webhook => &self.webhook,
            QueueName::Alert => &self.alert,
        }
    }

    pub fn with_jitter_ratio(self, ratio: f64) -> Self {
        Self {
            lifecycle: self.lifecycle.with_jitter_ratio(ratio),
            webhook: self.webhook.with_jitter_ratio(ratio),
            alert: self.alert.with_jitter_ratio(ratio),
        }
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter_ratio(0.0)
    }
}

impl Default for QueuePolicies {
    fn default() -> Self {
        Self {
            lifecycle: QueuePolicy::for_queue(QueueName::Lifecycle),
            webhook: QueuePolicy::for_queue(QueueName::Webhook),
            alert: QueuePolicy::for_queue(QueueName::Alert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles() {
        let policy = BackoffPolicy::exponential(1000);
        let delays: Vec<u128> = (1..=4).map(|a| next_delay(a, &policy).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn fixed_is_constant() {
        let policy = BackoffPolicy::fixed(500);
        assert_eq!(next_delay(1, &policy), Duration::from_millis(500));
        assert_eq!(next_delay(7, &policy), Duration::from_millis(500));
    }

    #[test]
    fn exponential_is_non_decreasing_and_saturates() {
        let policy = BackoffPolicy::exponential(2000);
        let mut prev = Duration::ZERO;
        for attempt in 1..=80 {
            let delay = next_delay(attempt, &policy);
            assert!(delay >= prev, "attempt {attempt}: {delay:?} < {prev:?}");
            prev = delay;
        }
        assert_eq!(prev, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let policy = BackoffPolicy::exponential(1000);
        assert_eq!(next_delay(0, &policy), next_delay(1, &policy));
    }

    #[test]
    fn jitter_stays_in_bounds_and_keeps_order() {
        let policy = QueuePolicy::for_queue(QueueName::Webhook);
        for _ in 0..200 {
            let first = policy.retry_delay(1).as_millis();
            let second = policy.retry_delay(2).as_millis();
            assert!((2000..=2200).contains(&first));
            assert!((4000..=4400).contains(&second));
            assert!(second >= first);
        }
        let full = with_jitter(Duration::from_millis(1000), 5.0).as_millis();
        assert!((1000..=2000).contains(&full));
    }

    #[test]
    fn queue_defaults() {
        let policies = QueuePolicies::default();
        assert_eq!(policies.lifecycle.max_attempts, 3);
        assert_eq!(policies.lifecycle.retention.completed, 100);
        assert_eq!(policies.lifecycle.retention.failed, 50);
        assert_eq!(policies.webhook.max_attempts, 5);
        assert_eq!(policies.webhook.backoff.base_delay_ms, 2000);
        assert_eq!(policies.webhook.retention.completed, 1000);
        assert_eq!(policies.alert.max_attempts, 3);
        assert_eq!(policies.without_jitter().alert.jitter_ratio, 0.0);
    }
}
