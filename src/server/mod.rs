//! HTTP ingress for the workflow router.
//!
//! The server does as little as possible: it verifies each delivery's
//! signature, enqueues it durably, and acknowledges. Everything after that
//! (matching, dispatching, tracking) happens in the worker pool, so GitHub's
//! delivery timeout never depends on how long a workflow takes.
//!
//! # Endpoints
//!
//! - `POST /webhook` - accepts GitHub webhook deliveries
//! - `GET /health` - liveness probe with queue depth

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{webhook_handler, WebhookError};

use crate::queue::DurableQueue;

/// Shared application state, passed to handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// The durable queue ingress enqueues into; shared with the worker pool.
    queue: Arc<DurableQueue>,

    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,
}

impl AppState {
    pub fn new(queue: Arc<DurableQueue>, webhook_secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                webhook_secret: webhook_secret.into(),
            }),
        }
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.inner.queue
    }

    /// Returns the webhook secret. Never log this.
    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::queue::QueueConfig;
    use crate::webhooks::{compute_signature, format_signature_header};

    fn test_app_state(secret: &[u8]) -> (AppState, Arc<DurableQueue>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let queue = Arc::new(DurableQueue::open(dir.path(), QueueConfig::default()).unwrap());
        let state = AppState::new(Arc::clone(&queue), secret.to_vec());
        (state, queue, dir)
    }

    /// Creates a webhook request with a valid signature over the body.
    fn create_webhook_request(
        secret: &[u8],
        event_type: &str,
        delivery_id: &str,
        body: &serde_json::Value,
    ) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let signature = compute_signature(&body_bytes, secret);
        let signature_header = format_signature_header(&signature);

        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", delivery_id)
            .header("x-hub-signature-256", signature_header)
            .body(Body::from(body_bytes))
            .unwrap()
    }

    fn pr_body() -> serde_json::Value {
        serde_json::json!({
            "action": "opened",
            "repository": {
                "name": "hello-world",
                "owner": { "login": "octocat" }
            }
        })
    }

    // ─── Health endpoint tests ───

    #[tokio::test]
    async fn health_reports_queue_depth() {
        let secret = b"test-secret";
        let (state, queue, _dir) = test_app_state(secret);

        let app = build_router(state.clone());
        let request = create_webhook_request(
            secret,
            "pull_request",
            "550e8400-e29b-41d4-a716-446655440000",
            &pr_body(),
        );
        assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);
        assert_eq!(queue.depth().unwrap(), 1);

        let app = build_router(state);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["queue_depth"], 1);
        assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
    }

    // ─── Webhook endpoint tests ───

    #[tokio::test]
    async fn webhook_valid_returns_200_and_enqueues() {
        let secret = b"test-secret";
        let (state, queue, _dir) = test_app_state(secret);
        let app = build_router(state);

        let request = create_webhook_request(
            secret,
            "pull_request",
            "550e8400-e29b-41d4-a716-446655440000",
            &pr_body(),
        );
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let message = queue
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message.delivery_id().as_str(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(message.record.event_type, "pull_request");
        assert_eq!(message.record.action, "opened");
    }

    #[tokio::test]
    async fn webhook_invalid_signature_returns_401() {
        let (state, queue, _dir) = test_app_state(b"correct-secret");
        let app = build_router(state);

        // Signed with the wrong secret.
        let request = create_webhook_request(
            b"wrong-secret",
            "pull_request",
            "550e8400-e29b-41d4-a716-446655440001",
            &pr_body(),
        );
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn webhook_missing_event_header_returns_400() {
        let secret = b"test-secret";
        let (state, _queue, _dir) = test_app_state(secret);
        let app = build_router(state);

        let body_bytes = serde_json::to_vec(&pr_body()).unwrap();
        let signature = compute_signature(&body_bytes, secret);
        let signature_header = format_signature_header(&signature);

        // No x-github-event header.
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-delivery", "550e8400-e29b-41d4-a716-446655440002")
            .header("x-hub-signature-256", signature_header)
            .body(Body::from(body_bytes))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_invalid_json_returns_400() {
        let secret = b"test-secret";
        let (state, _queue, _dir) = test_app_state(secret);
        let app = build_router(state);

        let body_bytes = b"{not json".to_vec();
        let signature = compute_signature(&body_bytes, secret);
        let signature_header = format_signature_header(&signature);

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", "pull_request")
            .header("x-github-delivery", "550e8400-e29b-41d4-a716-446655440003")
            .header("x-hub-signature-256", signature_header)
            .body(Body::from(body_bytes))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_unroutable_payload_is_still_accepted() {
        let secret = b"test-secret";
        let (state, queue, _dir) = test_app_state(secret);
        let app = build_router(state);

        // An installation ping has no repository block. Ingress does not
        // care; the worker drops it later.
        let body = serde_json::json!({"zen": "Design for failure.", "hook_id": 1});
        let request = create_webhook_request(
            secret,
            "ping",
            "550e8400-e29b-41d4-a716-446655440004",
            &body,
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[tokio::test]
    async fn webhook_duplicate_delivery_returns_202_without_requeueing() {
        let secret = b"test-secret";
        let (state, queue, _dir) = test_app_state(secret);

        let delivery_id = "550e8400-e29b-41d4-a716-446655440005";

        let app = build_router(state.clone());
        let request = create_webhook_request(secret, "pull_request", delivery_id, &pr_body());
        assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);

        let app = build_router(state);
        let request = create_webhook_request(secret, "pull_request", delivery_id, &pr_body());
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[tokio::test]
    async fn webhook_unsafe_delivery_id_returns_400() {
        let secret = b"test-secret";
        let (state, queue, _dir) = test_app_state(secret);
        let app = build_router(state);

        let request = create_webhook_request(secret, "pull_request", "../escape", &pr_body());
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(queue.depth().unwrap(), 0);
    }
}
