//! Webhook queue handler: signed HTTP delivery.
//!
//! Wire contract:
//! - `POST <url>` with the job payload serialized verbatim as a JSON body
//! - `X-Webhook-Id` carries the job id; it is stable across retries so
//!   receivers can dedupe
//! - `X-Webhook-Attempt` carries the 1-based attempt number
//! - when the job has a secret, `X-Webhook-Signature: sha256=<hex>` is the
//!   HMAC-SHA256 of the exact body bytes under that secret

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use sha2::Sha256;

use crate::error::WebhookError;
use crate::queue::{Job, JobFailure, JobPayload, WebhookJob};
use crate::worker::handler::JobHandler;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const DELIVERY_ID_HEADER: &str = "x-webhook-id";
pub const ATTEMPT_HEADER: &str = "x-webhook-attempt";

const SIGNATURE_PREFIX: &str = "sha256=";

/// `sha256=<hex(HMAC-SHA256(secret, body))>`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Receiver-side check of a signature header. Constant-time comparison.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(encoded) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Map a response status to success or a retry decision.
///
/// 2xx succeeds. 408 and 429 are transient; any other 4xx means the
/// receiver rejected the request and retrying cannot help. Everything else
/// (5xx, unexpected 1xx/3xx) is transient.
pub fn classify_status(status: StatusCode) -> Result<(), JobFailure> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(JobFailure::transient(format!("receiver returned {status}")));
    }
    if status.is_client_error() {
        return Err(JobFailure::terminal(format!("receiver rejected delivery with {status}")));
    }
    Err(JobFailure::transient(format!("receiver returned {status}")))
}

pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    /// Handler with its own client. Redirects are not followed.
    pub fn new(request_timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("agent-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Deliver one attempt. Returns the receiver's status on success.
    pub async fn deliver(
        &self,
        delivery_id: &str,
        attempt: u32,
        hook: &WebhookJob,
    ) -> Result<StatusCode, JobFailure> {
        let url = reqwest::Url::parse(&hook.url).map_err(|e| {
            JobFailure::terminal(
                WebhookError::InvalidUrl {
                    url: hook.url.clone(),
                    reason: e.to_string(),
                }
                .to_string(),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(JobFailure::terminal(
                WebhookError::InvalidUrl {
                    url: hook.url.clone(),
                    reason: format!("unsupported scheme {}", url.scheme()),
                }
                .to_string(),
            ));
        }
        let host = url.host_str().unwrap_or_default().to_string();

        let body = serde_json::to_vec(&hook.payload)
            .map_err(|e| JobFailure::terminal(WebhookError::from(e).to_string()))?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(DELIVERY_ID_HEADER, delivery_id)
            .header(ATTEMPT_HEADER, attempt.to_string());
        if let Some(secret) = &hook.secret {
            let signature =
                sign(secret, &body).map_err(|e| JobFailure::terminal(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body).send().await.map_err(|e| {
            tracing::debug!(host = %host, delivery_id, attempt, error = %e, "Webhook request failed");
            JobFailure::transient(WebhookError::Http(e).to_string())
        })?;

        let status = response.status();
        if let Err(failure) = classify_status(status) {
            tracing::debug!(
                host = %host,
                delivery_id,
                attempt,
                status = status.as_u16(),
                retryable = failure.is_retryable(),
                "Webhook receiver did not accept delivery"
            );
            return Err(failure);
        }

        tracing::debug!(host = %host, delivery_id, attempt, status = status.as_u16(), "Webhook delivered");
        Ok(status)
    }
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, job: &Job) -> Result<Value, JobFailure> {
        let JobPayload::Webhook(hook) = &job.payload else {
            return Err(JobFailure::terminal(format!(
                "webhook handler cannot run {} payloads",
                job.payload.kind()
            )));
        };
        let status = self.deliver(&job.id, job.attempt, hook).await?;
        Ok(json!({ "status": status.as_u16() }))
    }
}
