//! Integration tests for webhook delivery through the worker pool.
//!
//! Each test spins up an Axum receiver on a random port and drives the
//! webhook queue with an in-memory store and a manual clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use agent_orchestrator::queue::clock::ManualClock;
use agent_orchestrator::queue::{
    InMemoryQueue, JobProducer, JobQueue, JobStatus, QueueName, QueuePolicies, WebhookJob,
};
use agent_orchestrator::worker::webhook::{
    ATTEMPT_HEADER, DELIVERY_ID_HEADER, SIGNATURE_HEADER, verify_signature,
};
use agent_orchestrator::worker::{JobOutcome, WebhookHandler, WorkerConfig, WorkerPool};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Delivery {
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Receiver that answers with scripted statuses (200 once the script runs out).
#[derive(Clone, Default)]
struct Receiver {
    statuses: Arc<Mutex<VecDeque<u16>>>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Receiver {
    fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    fn header(&self, index: usize, name: &str) -> String {
        self.deliveries.lock().unwrap()[index].headers[name]
            .to_str()
            .unwrap()
            .to_string()
    }
}

async fn hook(State(receiver): State<Receiver>, headers: HeaderMap, body: Bytes) -> StatusCode {
    receiver.deliveries.lock().unwrap().push(Delivery {
        headers,
        body: body.to_vec(),
    });
    let code = receiver.statuses.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(code).unwrap()
}

/// Start a receiver on a random port, return (url, receiver).
async fn start_receiver(statuses: &[u16]) -> (String, Receiver) {
    let receiver = Receiver {
        statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
        ..Default::default()
    };
    let app = Router::new()
        .route("/hook", post(hook))
        .with_state(receiver.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}/hook"), receiver)
}

struct Harness {
    queue: Arc<InMemoryQueue>,
    clock: Arc<ManualClock>,
    producer: JobProducer,
    pool: WorkerPool,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::default());
    let queue = Arc::new(InMemoryQueue::with_clock(
        QueuePolicies::default().without_jitter(),
        clock.clone(),
    ));
    let pool = WorkerPool::new(
        queue.clone(),
        QueueName::Webhook,
        Arc::new(WebhookHandler::new(Duration::from_secs(2)).unwrap()),
        WorkerConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
            lease_window: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(3),
        },
    );
    Harness {
        producer: JobProducer::new(queue.clone()),
        queue,
        clock,
        pool,
    }
}

fn webhook(url: &str, secret: Option<&str>) -> WebhookJob {
    let payload = json!({
        "event": "agent.started",
        "agent_id": "agent-42",
        "nested": { "ok": true }
    });
    WebhookJob {
        url: url.to_string(),
        payload: payload.as_object().unwrap().clone(),
        secret: secret.map(str::to_string),
    }
}

#[tokio::test]
async fn client_error_fails_after_one_attempt() {
    timeout(TEST_TIMEOUT, async {
        let (url, receiver) = start_receiver(&[400]).await;
        let h = harness();
        let handle = h.producer.schedule_webhook(webhook(&url, None)).await.unwrap();

        let outcome = h.pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempt: 1, .. }));

        // Never leased again, no matter how much time passes.
        h.clock.advance(Duration::from_secs(3600));
        assert!(h.pool.run_once().await.unwrap().is_none());
        assert_eq!(receiver.count(), 1);

        let job = h.queue.job(QueueName::Webhook, &handle.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.attempts.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn signed_delivery_is_verifiable_by_receiver() {
    timeout(TEST_TIMEOUT, async {
        let (url, receiver) = start_receiver(&[]).await;
        let h = harness();
        let handle = h
            .producer
            .schedule_webhook(webhook(&url, Some("whsec_test")))
            .await
            .unwrap();

        let outcome = h.pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Completed { attempt: 1, .. }));

        let (body, signature) = {
            let deliveries = receiver.deliveries.lock().unwrap();
            let d = &deliveries[0];
            assert_eq!(d.headers["content-type"], "application/json");
            (
                d.body.clone(),
                d.headers[SIGNATURE_HEADER].to_str().unwrap().to_string(),
            )
        };
        assert!(signature.starts_with("sha256="));
        assert!(verify_signature("whsec_test", &body, &signature));
        assert!(!verify_signature("wrong", &body, &signature));

        let sent: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent["nested"]["ok"], true);
        assert_eq!(receiver.header(0, DELIVERY_ID_HEADER), handle.id);
        assert_eq!(receiver.header(0, ATTEMPT_HEADER), "1");

        let job = h.queue.job(QueueName::Webhook, &handle.id).await.unwrap().unwrap();
        assert_eq!(job.result, Some(json!({ "status": 200 })));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unsigned_delivery_has_no_signature_header() {
    timeout(TEST_TIMEOUT, async {
        let (url, receiver) = start_receiver(&[204]).await;
        let h = harness();
        h.producer.schedule_webhook(webhook(&url, None)).await.unwrap();

        let outcome = h.pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Completed { .. }));
        let deliveries = receiver.deliveries.lock().unwrap();
        assert!(!deliveries[0].headers.contains_key(SIGNATURE_HEADER));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rate_limited_delivery_is_retried_with_same_id() {
    timeout(TEST_TIMEOUT, async {
        let (url, receiver) = start_receiver(&[429]).await;
        let h = harness();
        let handle = h.producer.schedule_webhook(webhook(&url, None)).await.unwrap();

        let outcome = h.pool.run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Retrying {
                job_id: handle.id.clone(),
                next_attempt: 2,
                delay: Duration::from_millis(2000),
            }
        );

        assert!(h.pool.run_once().await.unwrap().is_none());
        h.clock.advance(Duration::from_millis(2000));
        let outcome = h.pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Completed { attempt: 2, .. }));

        assert_eq!(receiver.count(), 2);
        assert_eq!(receiver.header(1, DELIVERY_ID_HEADER), handle.id);
        assert_eq!(receiver.header(1, ATTEMPT_HEADER), "2");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn server_errors_exhaust_the_webhook_budget() {
    timeout(TEST_TIMEOUT, async {
        let (url, receiver) = start_receiver(&[503, 503, 503, 503, 503]).await;
        let h = harness();
        let handle = h.producer.schedule_webhook(webhook(&url, None)).await.unwrap();

        let mut delays = Vec::new();
        loop {
            match h.pool.run_once().await.unwrap().unwrap() {
                JobOutcome::Retrying { delay, .. } => {
                    delays.push(delay.as_millis());
                    h.clock.advance(delay);
                }
                JobOutcome::Failed { attempt, .. } => {
                    assert_eq!(attempt, 5);
                    break;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(delays, vec![2000, 4000, 8000, 16000]);
        assert_eq!(receiver.count(), 5);

        let failed = h.queue.failed(QueueName::Webhook, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, handle.id);
    })
    .await
    .expect("test timed out");
}
