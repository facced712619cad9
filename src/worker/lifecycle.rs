//! Lifecycle queue handler: applies start/stop/pause/resume/restart to an agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{Value, json};

use crate::cache::Cache;
use crate::error::ControlError;
use crate::queue::{AgentAction, Job, JobFailure, JobPayload};
use crate::worker::handler::JobHandler;

/// The agent runtime, as seen from the lifecycle queue.
#[async_trait]
pub trait AgentController: Send + Sync {
    /// Apply `action` to the agent. Returns a JSON summary of the new state.
    async fn apply(
        &self,
        agent_id: &str,
        user_id: &str,
        action: AgentAction,
    ) -> Result<Value, ControlError>;
}

/// `AgentController` over the agent runtime's HTTP control API.
///
/// Sends `POST {base}/agents/{agent_id}/{action}` with an `X-User-Id`
/// header. The agent id is percent-encoded as a single path segment.
/// 404 maps to `NotFound`; 400, 409 and 422 to `Invalid`; anything else
/// that is not 2xx, and network errors, to `Unavailable`.
pub struct HttpAgentController {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpAgentController {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControlError> {
        let invalid =
            |reason: String| ControlError::Invalid(format!("runtime url {base_url}: {reason}"));
        let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(invalid("must be an http(s) base url".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            base_url: url,
            client,
        })
    }

    fn action_url(&self, agent_id: &str, action: AgentAction) -> Result<Url, ControlError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ControlError::Invalid(format!("runtime url {} has no path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["agents", agent_id, action.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl AgentController for HttpAgentController {
    async fn apply(
        &self,
        agent_id: &str,
        user_id: &str,
        action: AgentAction,
    ) -> Result<Value, ControlError> {
        let url = self.action_url(agent_id, action)?;
        let response = self
            .client
            .post(url)
            .header("X-User-Id", user_id)
            .send()
            .await
            .map_err(|e| ControlError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await.unwrap_or(Value::Null));
        }
        let detail = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ControlError::NotFound(agent_id.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ControlError::Invalid(format!("{status}: {detail}")))
            }
            _ => Err(ControlError::Unavailable(format!("{status}: {detail}"))),
        }
    }
}

/// Cache keys derived from one agent's state.
pub fn agent_cache_pattern(agent_id: &str) -> String {
    format!("agent:{agent_id}:*")
}

pub struct LifecycleHandler {
    controller: Arc<dyn AgentController>,
    cache: Cache,
}

impl LifecycleHandler {
    pub fn new(controller: Arc<dyn AgentController>, cache: Cache) -> Self {
        Self { controller, cache }
    }
}

#[async_trait]
impl JobHandler for LifecycleHandler {
    fn name(&self) -> &str {
        "lifecycle"
    }

    async fn handle(&self, job: &Job) -> Result<Value, JobFailure> {
        let JobPayload::Agent(request) = &job.payload else {
            return Err(JobFailure::terminal(format!(
                "lifecycle handler cannot run {} payloads",
                job.payload.kind()
            )));
        };

        let state = self
            .controller
            .apply(&request.agent_id, &request.user_id, request.action)
            .await
            .map_err(|e| match e {
                ControlError::NotFound(_) | ControlError::Invalid(_) => {
                    JobFailure::terminal(e.to_string())
                }
                ControlError::Unavailable(_) => JobFailure::transient(e.to_string()),
            })?;

        let evicted = self
            .cache
            .delete_by_pattern(&agent_cache_pattern(&request.agent_id))
            .await;
        tracing::info!(
            agent_id = %request.agent_id,
            action = %request.action,
            cache_evicted = evicted,
            "Agent lifecycle action applied"
        );

        Ok(json!({
            "agent_id": request.agent_id,
            "action": request.action,
            "state": state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::MemoryCache;
    use crate::queue::{AgentJob, JobOptions, QueuePolicy, QueueName};
    use chrono::Utc;

    struct FixedController(fn(&str) -> Result<Value, ControlError>);

    #[async_trait]
    impl AgentController for FixedController {
        async fn apply(
            &self,
            agent_id: &str,
            _user_id: &str,
            _action: AgentAction,
        ) -> Result<Value, ControlError> {
            (self.0)(agent_id)
        }
    }

    fn job(agent_id: &str) -> Job {
        Job::new(
            "agent:start",
            JobPayload::Agent(AgentJob {
                agent_id: agent_id.into(),
                user_id: "user-1".into(),
                action: AgentAction::Start,
            }),
            &QueuePolicy::for_queue(QueueName::Lifecycle),
            &JobOptions::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn success_invalidates_agent_cache() {
        let backend = Arc::new(MemoryCache::new());
        let cache = Cache::new(backend.clone());
        cache.set("agent:a1:status", &"stopped", 60).await;
        cache.set("agent:a2:status", &"running", 60).await;

        let handler = LifecycleHandler::new(
            Arc::new(FixedController(|_| Ok(json!({"status": "running"})))),
            cache.clone(),
        );
        let out = handler.handle(&job("a1")).await.unwrap();
        assert_eq!(out["state"]["status"], "running");
        assert_eq!(out["action"], "start");

        assert_eq!(cache.get::<String>("agent:a1:status").await, None);
        assert_eq!(
            cache.get::<String>("agent:a2:status").await.as_deref(),
            Some("running")
        );
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn not_found_and_invalid_are_terminal() {
        let handler = LifecycleHandler::new(
            Arc::new(FixedController(|id| Err(ControlError::NotFound(id.into())))),
            Cache::disabled(),
        );
        assert!(!handler.handle(&job("gone")).await.unwrap_err().is_retryable());

        let handler = LifecycleHandler::new(
            Arc::new(FixedController(|_| {
                Err(ControlError::Invalid("already running".into()))
            })),
            Cache::disabled(),
        );
        assert!(!handler.handle(&job("a1")).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn unavailable_runtime_is_transient() {
        let handler = LifecycleHandler::new(
            Arc::new(FixedController(|_| {
                Err(ControlError::Unavailable("connection refused".into()))
            })),
            Cache::disabled(),
        );
        assert!(handler.handle(&job("a1")).await.unwrap_err().is_retryable());
    }

    #[test]
    fn agent_id_stays_one_path_segment() {
        let controller =
            HttpAgentController::new("http://runtime.local/api/", Duration::from_secs(1)).unwrap();
        let url = controller
            .action_url("victim/stop?#x", AgentAction::Start)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://runtime.local/api/agents/victim%2Fstop%3F%23x/start"
        );

        let controller =
            HttpAgentController::new("http://runtime.local", Duration::from_secs(1)).unwrap();
        let url = controller.action_url("a1", AgentAction::Pause).unwrap();
        assert_eq!(url.as_str(), "http://runtime.local/agents/a1/pause");
    }

    #[test]
    fn non_http_runtime_url_is_rejected() {
        assert!(HttpAgentController::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpAgentController::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn wrong_payload_is_terminal() {
        let mut job = job("a1");
        job.payload = JobPayload::Alert(crate::queue::AlertJob {
            agent_id: "a1".into(),
            user_id: "u".into(),
            alert_type: "t".into(),
            message: "m".into(),
            data: None,
        });
        let handler = LifecycleHandler::new(
            Arc::new(FixedController(|_| Ok(Value::Null))),
            Cache::disabled(),
        );
        assert!(!handler.handle(&job).await.unwrap_err().is_retryable());
    }
}
