//! Configuration types.
//!
//! Everything is read from `AGENT_ORCH_*` environment variables. Unset
//! variables fall back to defaults; a variable that is set but cannot be
//! parsed is a configuration error.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::queue::{QueueName, QueuePolicies};
use crate::queue::policy::DEFAULT_JITTER_RATIO;
use crate::worker::WorkerConfig;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Redis connection URL. `None` runs without a backing store.
    pub redis_url: Option<SecretString>,
    /// Prefix for every queue key in Redis.
    pub key_prefix: String,
    /// Interval of the backing-store availability probe.
    pub probe_interval: Duration,
    /// Use the backing store as a cache side channel too.
    pub cache_enabled: bool,
    pub jitter_ratio: f64,
    pub lifecycle_concurrency: usize,
    pub webhook_concurrency: usize,
    pub alert_concurrency: usize,
    pub poll_interval: Duration,
    pub lease_window: Duration,
    pub handler_timeout: Duration,
    /// Per-request timeout for webhook deliveries.
    pub webhook_timeout: Duration,
    /// Base URL of the agent runtime's control API. Lifecycle jobs are not
    /// consumed when unset.
    pub runtime_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub ops_host: String,
    pub ops_port: u16,
    /// Directory for daily-rotated log files. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Telegram bot and the chat each user's alerts go to.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// `(user_id, chat_id)` pairs.
    pub chats: Vec<(String, String)>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "agent-orch".to_string(),
            probe_interval: Duration::from_secs(5),
            cache_enabled: true,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            lifecycle_concurrency: 2,
            webhook_concurrency: 4,
            alert_concurrency: 2,
            poll_interval: Duration::from_millis(500),
            lease_window: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(10),
            runtime_url: None,
            telegram: None,
            ops_host: "0.0.0.0".to_string(),
            ops_port: 8080,
            log_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram = match (
            var("AGENT_ORCH_TELEGRAM_BOT_TOKEN"),
            var("AGENT_ORCH_TELEGRAM_CHATS"),
        ) {
            (Some(token), Some(chats)) => Some(TelegramConfig {
                bot_token: SecretString::from(token),
                chats: parse_chats(&chats)?,
            }),
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar(
                    "AGENT_ORCH_TELEGRAM_CHATS".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar(
                    "AGENT_ORCH_TELEGRAM_BOT_TOKEN".to_string(),
                ));
            }
            (None, None) => None,
        };

        let jitter_ratio: f64 = parse(&var, "AGENT_ORCH_JITTER_RATIO", defaults.jitter_ratio)?;
        if !(0.0..=1.0).contains(&jitter_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_ORCH_JITTER_RATIO".to_string(),
                message: format!("{jitter_ratio} is outside 0.0..=1.0"),
            });
        }

        let config = Self {
            redis_url: var("AGENT_ORCH_REDIS_URL").map(SecretString::from),
            key_prefix: var("AGENT_ORCH_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            probe_interval: Duration::from_secs(parse(
                &var,
                "AGENT_ORCH_PROBE_INTERVAL_SECS",
                defaults.probe_interval.as_secs(),
            )?),
            cache_enabled: parse(&var, "AGENT_ORCH_CACHE_ENABLED", defaults.cache_enabled)?,
            jitter_ratio,
            lifecycle_concurrency: parse(
                &var,
                "AGENT_ORCH_LIFECYCLE_CONCURRENCY",
                defaults.lifecycle_concurrency,
            )?,
            webhook_concurrency: parse(
                &var,
                "AGENT_ORCH_WEBHOOK_CONCURRENCY",
                defaults.webhook_concurrency,
            )?,
            alert_concurrency: parse(
                &var,
                "AGENT_ORCH_ALERT_CONCURRENCY",
                defaults.alert_concurrency,
            )?,
            poll_interval: Duration::from_millis(parse(
                &var,
                "AGENT_ORCH_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            lease_window: Duration::from_secs(parse(
                &var,
                "AGENT_ORCH_LEASE_WINDOW_SECS",
                defaults.lease_window.as_secs(),
            )?),
            handler_timeout: Duration::from_secs(parse(
                &var,
                "AGENT_ORCH_HANDLER_TIMEOUT_SECS",
                defaults.handler_timeout.as_secs(),
            )?),
            webhook_timeout: Duration::from_secs(parse(
                &var,
                "AGENT_ORCH_WEBHOOK_TIMEOUT_SECS",
                defaults.webhook_timeout.as_secs(),
            )?),
            runtime_url: var("AGENT_ORCH_RUNTIME_URL"),
            telegram,
            ops_host: var("AGENT_ORCH_OPS_HOST").unwrap_or(defaults.ops_host),
            ops_port: parse(&var, "AGENT_ORCH_OPS_PORT", defaults.ops_port)?,
            log_dir: var("AGENT_ORCH_LOG_DIR").map(PathBuf::from),
        };

        if config.handler_timeout >= config.lease_window {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_ORCH_HANDLER_TIMEOUT_SECS".to_string(),
                message: format!(
                    "handler timeout {:?} must be shorter than the lease window {:?}",
                    config.handler_timeout, config.lease_window
                ),
            });
        }

        Ok(config)
    }

    /// Queue policies with the configured jitter applied.
    pub fn policies(&self) -> QueuePolicies {
        QueuePolicies::default().with_jitter_ratio(self.jitter_ratio)
    }

    pub fn worker_config(&self, queue: QueueName) -> WorkerConfig {
        let concurrency = match queue {
            QueueName::Lifecycle => self.lifecycle_concurrency,
            QueueName::Webhook => self.webhook_concurrency,
            QueueName::Alert => self.alert_concurrency,
        };
        WorkerConfig {
            concurrency,
            poll_interval: self.poll_interval,
            lease_window: self.lease_window,
            handler_timeout: self.handler_timeout,
        }
    }

    pub fn ops_addr(&self) -> String {
        format!("{}:{}", self.ops_host, self.ops_port)
    }
}

/// `user=chat,user=chat`. Each user appears once.
fn parse_chats(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "AGENT_ORCH_TELEGRAM_CHATS".to_string(),
        message,
    };
    let mut chats: Vec<(String, String)> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((user, chat)) = entry.split_once('=') else {
            return Err(invalid(format!("{entry:?} is not user=chat")));
        };
        let (user, chat) = (user.trim(), chat.trim());
        if user.is_empty() || chat.is_empty() {
            return Err(invalid(format!("{entry:?} is not user=chat")));
        }
        if chats.iter().any(|(u, _)| u == user) {
            return Err(invalid(format!("user {user} is listed twice")));
        }
        chats.push((user.to_string(), chat.to_string()));
    }
    if chats.is_empty() {
        return Err(invalid("no chats listed".to_string()));
    }
    Ok(chats)
}

fn parse<T, V>(var: &V, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
