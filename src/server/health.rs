//! Health check endpoint for liveness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::warn;

use super::AppState;

/// Health check handler.
///
/// Reports the queue depth alongside the version, so a probe that scrapes
/// the body can notice a backlog building up.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok","version":"0.1.0","queue_depth":0}
/// ```
pub async fn health_handler(State(app_state): State<AppState>) -> Response {
    match app_state.queue().depth() {
        Ok(depth) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "queue_depth": depth,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "health check could not read queue depth");
            (StatusCode::INTERNAL_SERVER_ERROR, "queue unavailable").into_response()
        }
    }
}
