//! Operator HTTP API: queue inspection and agent capability listing.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::capability::{AgentType, CapabilityRegistry};
use crate::error::QueueError;
use crate::queue::{JobQueue, QueueName};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct OpsState {
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<CapabilityRegistry>,
}

/// Build the Axum router with the inspection routes.
pub fn ops_routes(queue: Arc<dyn JobQueue>, registry: Arc<CapabilityRegistry>) -> Router {
    let state = OpsState { queue, registry };

    Router::new()
        .route("/health", get(health))
        .route("/api/queues", get(queue_overview))
        .route("/api/queues/{queue}/failed", get(failed_jobs))
        .route("/api/queues/{queue}/completed", get(completed_jobs))
        .route("/api/queues/{queue}/jobs/{id}", get(job_detail))
        .route("/api/agents/{agent_type}/tools", get(agent_tools))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn store_error(e: QueueError) -> Response {
    match e {
        QueueError::Unavailable => error(StatusCode::SERVICE_UNAVAILABLE, "Backing store unavailable"),
        other => {
            warn!(error = %other, "Queue inspection failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn parse_queue(raw: &str) -> Result<QueueName, Response> {
    raw.parse::<QueueName>()
        .map_err(|e| error(StatusCode::NOT_FOUND, e))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<OpsState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "agent-orchestrator",
        "backend": state.queue.backend(),
        "store_available": state.queue.is_available(),
        "tools": state.registry.count(),
    }))
}

// ── Queues ──────────────────────────────────────────────────────────────

async fn queue_overview(State(state): State<OpsState>) -> Response {
    let mut queues = serde_json::Map::new();
    for queue in QueueName::ALL {
        match state.queue.counts(queue).await {
            Ok(counts) => {
                queues.insert(queue.to_string(), json!(counts));
            }
            Err(e) => return store_error(e),
        }
    }
    Json(json!({
        "store_available": state.queue.is_available(),
        "queues": queues,
    }))
    .into_response()
}

async fn failed_jobs(
    State(state): State<OpsState>,
    Path(queue): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    let queue = match parse_queue(&queue) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    match state.queue.failed(queue, params.limit()).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => store_error(e),
    }
}

async fn completed_jobs(
    State(state): State<OpsState>,
    Path(queue): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    let queue = match parse_queue(&queue) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    match state.queue.completed(queue, params.limit()).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => store_error(e),
    }
}

async fn job_detail(
    State(state): State<OpsState>,
    Path((queue, id)): Path<(String, String)>,
) -> Response {
    let queue = match parse_queue(&queue) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    match state.queue.job(queue, &id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, "Job not found or no longer retained"),
        Err(e) => store_error(e),
    }
}

// ── Capabilities ────────────────────────────────────────────────────────

async fn agent_tools(State(state): State<OpsState>, Path(agent_type): Path<String>) -> Response {
    let agent_type = match agent_type.parse::<AgentType>() {
        Ok(t) => t,
        Err(e) => return error(StatusCode::NOT_FOUND, e.to_string()),
    };
    Json(json!({
        "agent_type": agent_type,
        "tools": state.registry.definitions_for(agent_type),
    }))
    .into_response()
}
