//! Liveness endpoints. Neither requires authentication.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use docrelay_core::types::Timestamp;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    dispatcher_running: bool,
    /// Set while the workflow engine fails its health probes.
    engine_degraded: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    Json(HealthResponse {
        status: if dispatcher.is_degraded() { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        dispatcher_running: dispatcher.is_running(),
        engine_degraded: dispatcher.is_degraded(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookHealthResponse {
    status: &'static str,
    api_version: &'static str,
    timestamp: Timestamp,
}

/// GET /webhook/health
///
/// Probed by the workflow engine before it sends callbacks.
pub async fn webhook_health(State(state): State<AppState>) -> Json<WebhookHealthResponse> {
    Json(WebhookHealthResponse {
        status: "ok",
        api_version: state.validator.api_version(),
        timestamp: Utc::now(),
    })
}
