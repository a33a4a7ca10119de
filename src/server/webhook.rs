//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, verifies signatures, and enqueues them
//! durably before returning 200. Routing and dispatching happen
//! asynchronously in the worker pool, so a delivery is acknowledged the
//! moment it is safe on disk.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::queue::{EventRecord, QueueError};
use crate::types::DeliveryId;
use crate::webhooks::verify_signature;

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid JSON body.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Queue error.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::InvalidJson(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::Queue(QueueError::InvalidDeliveryId(_)) => StatusCode::BAD_REQUEST,
            WebhookError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: event type (e.g. `pull_request`, `check_suite`)
///   - `X-GitHub-Delivery`: unique delivery id
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: delivery durably enqueued
/// - 202 Accepted: delivery id already known, not enqueued again
/// - 400 Bad Request: missing header, invalid JSON, or unsafe delivery id
/// - 401 Unauthorized: invalid signature
/// - 500 Internal Server Error: enqueue failure
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id_str = get_header(&headers, HEADER_DELIVERY)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    let delivery_id = DeliveryId::new(delivery_id_str);

    debug!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "received webhook"
    );

    // Signature check comes before any parsing or disk I/O.
    if !verify_signature(&body, &signature_header, app_state.webhook_secret()) {
        warn!(delivery_id = %delivery_id, "invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)?;
    let action = payload
        .get("action")
        .and_then(|a| a.as_str())
        .unwrap_or_default()
        .to_string();

    let record = EventRecord {
        event_type: event_type.clone(),
        action,
        delivery_id: delivery_id.clone(),
        payload,
        received_at: Utc::now(),
    };

    match app_state.queue().enqueue(&record) {
        Ok(()) => {
            info!(
                delivery_id = %delivery_id,
                event_type = %event_type,
                "delivery enqueued"
            );
            Ok((StatusCode::OK, "enqueued"))
        }
        Err(QueueError::DuplicateDelivery(_)) => {
            debug!(delivery_id = %delivery_id, "duplicate delivery, already enqueued");
            Ok((StatusCode::ACCEPTED, "duplicate delivery"))
        }
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "failed to enqueue delivery");
            Err(WebhookError::Queue(e))
        }
    }
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
