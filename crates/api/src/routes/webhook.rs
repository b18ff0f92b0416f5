//! Route definitions for the callback surface used by the workflow engine.
//!
//! Result and error callbacks require a signed request from a key holding
//! `submit_results`; the status query takes an `X-API-Key` with
//! `read_status`. The health route is public.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{health, webhook};
use crate::state::AppState;

/// Routes mounted at `/webhook`.
///
/// ```text
/// POST   /results         -> receive_results
/// POST   /errors          -> receive_error
/// GET    /status          -> job_status
/// GET    /health          -> webhook_health
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/results", post(webhook::receive_results))
        .route("/errors", post(webhook::receive_error))
        .route("/status", get(webhook::job_status))
        .route("/health", get(health::webhook_health))
}
