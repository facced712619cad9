//! Integration tests for lifecycle jobs: retry exhaustion and the HTTP
//! agent controller against a stub runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use agent_orchestrator::cache::Cache;
use agent_orchestrator::error::ControlError;
use agent_orchestrator::queue::clock::ManualClock;
use agent_orchestrator::queue::{
    AgentAction, AgentJob, InMemoryQueue, JobProducer, JobQueue, JobStatus, QueueName,
    QueuePolicies,
};
use agent_orchestrator::worker::{
    AgentController, HttpAgentController, JobOutcome, LifecycleHandler, WorkerConfig, WorkerPool,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime that is always down.
#[derive(Default)]
struct DownRuntime {
    calls: AtomicU32,
}

#[async_trait]
impl AgentController for DownRuntime {
    async fn apply(
        &self,
        _agent_id: &str,
        _user_id: &str,
        _action: AgentAction,
    ) -> Result<Value, ControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ControlError::Unavailable("connection refused".into()))
    }
}

fn start_job() -> AgentJob {
    AgentJob {
        agent_id: "agent-42".into(),
        user_id: "user-7".into(),
        action: AgentAction::Start,
    }
}

fn config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 1,
        poll_interval: Duration::from_millis(10),
        lease_window: Duration::from_secs(30),
        handler_timeout: Duration::from_secs(3),
    }
}

#[tokio::test]
async fn unavailable_runtime_exhausts_three_attempts() {
    let clock = Arc::new(ManualClock::default());
    let queue = Arc::new(InMemoryQueue::with_clock(
        QueuePolicies::default().without_jitter(),
        clock.clone(),
    ));
    let runtime = Arc::new(DownRuntime::default());
    let pool = WorkerPool::new(
        queue.clone(),
        QueueName::Lifecycle,
        Arc::new(LifecycleHandler::new(runtime.clone(), Cache::disabled())),
        config(),
    );
    let producer = JobProducer::new(queue.clone());

    let handle = producer.schedule_agent_job(start_job(), None).await.unwrap();
    assert_eq!(handle.name, "agent:start");

    let outcome = pool.run_once().await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::Retrying { next_attempt: 2, delay, .. } if delay == Duration::from_millis(1000)
    ));

    // Not eligible before its delay.
    clock.advance(Duration::from_millis(999));
    assert!(pool.run_once().await.unwrap().is_none());
    clock.advance(Duration::from_millis(1));

    let outcome = pool.run_once().await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::Retrying { next_attempt: 3, delay, .. } if delay == Duration::from_millis(2000)
    ));

    clock.advance(Duration::from_millis(2000));
    let outcome = pool.run_once().await.unwrap().unwrap();
    assert!(matches!(outcome, JobOutcome::Failed { attempt: 3, .. }));

    clock.advance(Duration::from_secs(3600));
    assert!(pool.run_once().await.unwrap().is_none());
    assert_eq!(runtime.calls.load(Ordering::SeqCst), 3);

    let job = queue.job(QueueName::Lifecycle, &handle.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, job.max_attempts);
    let delays: Vec<Option<u64>> = job.attempts.iter().map(|a| a.retry_delay_ms).collect();
    assert_eq!(delays, vec![Some(1000), Some(2000), None]);
}

#[tokio::test]
async fn delayed_agent_job_waits_for_its_slot() {
    let clock = Arc::new(ManualClock::default());
    let queue = Arc::new(InMemoryQueue::with_clock(
        QueuePolicies::default().without_jitter(),
        clock.clone(),
    ));
    let producer = JobProducer::new(queue.clone());
    producer
        .schedule_agent_job(start_job(), Some(5_000))
        .await
        .unwrap();

    assert!(queue.lease(QueueName::Lifecycle, Duration::from_secs(30)).await.unwrap().is_none());
    assert_eq!(queue.counts(QueueName::Lifecycle).await.unwrap().delayed, 1);

    clock.advance(Duration::from_secs(5));
    assert!(queue.lease(QueueName::Lifecycle, Duration::from_secs(30)).await.unwrap().is_some());
}

// ── HTTP controller against a stub runtime ─────────────────────────────

async fn runtime_action(
    Path((agent_id, action)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, axum::Json<Value>) {
    let user = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    match agent_id.as_str() {
        "missing" => (StatusCode::NOT_FOUND, axum::Json(json!({"error": "no such agent"}))),
        "busy" => (StatusCode::CONFLICT, axum::Json(json!({"error": "already running"}))),
        "flaky" => (StatusCode::BAD_GATEWAY, axum::Json(json!({"error": "upstream"}))),
        _ => (
            StatusCode::OK,
            axum::Json(json!({ "agent_id": agent_id, "action": action, "user": user })),
        ),
    }
}

/// Start a stub runtime on a random port, return its base URL.
async fn start_runtime() -> String {
    let app = Router::new().route("/agents/{id}/{action}", post(runtime_action));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn http_controller_maps_runtime_responses() {
    timeout(TEST_TIMEOUT, async {
        let base = start_runtime().await;
        let controller = HttpAgentController::new(&format!("{base}/"), Duration::from_secs(2)).unwrap();

        let state = controller
            .apply("agent-1", "user-9", AgentAction::Pause)
            .await
            .unwrap();
        assert_eq!(state["action"], "pause");
        assert_eq!(state["user"], "user-9");

        assert!(matches!(
            controller.apply("missing", "u", AgentAction::Start).await,
            Err(ControlError::NotFound(_))
        ));
        assert!(matches!(
            controller.apply("busy", "u", AgentAction::Start).await,
            Err(ControlError::Invalid(_))
        ));
        assert!(matches!(
            controller.apply("flaky", "u", AgentAction::Start).await,
            Err(ControlError::Unavailable(_))
        ));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn agent_id_with_path_characters_reaches_runtime_verbatim() {
    timeout(TEST_TIMEOUT, async {
        let base = start_runtime().await;
        let controller = HttpAgentController::new(&base, Duration::from_secs(2)).unwrap();

        let state = controller
            .apply("victim/stop?", "attacker", AgentAction::Start)
            .await
            .unwrap();
        assert_eq!(state["agent_id"], "victim/stop?");
        assert_eq!(state["action"], "start");

        let state = controller
            .apply("a#b", "u", AgentAction::Resume)
            .await
            .unwrap();
        assert_eq!(state["agent_id"], "a#b");
        assert_eq!(state["action"], "resume");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_agent_fails_lifecycle_job_immediately() {
    timeout(TEST_TIMEOUT, async {
        let base = start_runtime().await;
        let queue = Arc::new(InMemoryQueue::new());
        let controller = Arc::new(HttpAgentController::new(&base, Duration::from_secs(2)).unwrap());
        let pool = WorkerPool::new(
            queue.clone(),
            QueueName::Lifecycle,
            Arc::new(LifecycleHandler::new(controller, Cache::disabled())),
            config(),
        );
        let producer = JobProducer::new(queue.clone());
        producer
            .schedule_agent_job(
                AgentJob {
                    agent_id: "missing".into(),
                    user_id: "user-7".into(),
                    action: AgentAction::Stop,
                },
                None,
            )
            .await
            .unwrap();

        let outcome = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempt: 1, .. }));
        assert_eq!(queue.counts(QueueName::Lifecycle).await.unwrap().failed, 1);
    })
    .await
    .expect("test timed out");
}
