//! Route definitions for dispatcher inspection. All routes require `admin`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::dispatcher;
use crate::state::AppState;

/// Routes mounted at `/dispatcher`.
///
/// ```text
/// GET    /stats                     -> dispatcher_stats
/// GET    /requests                  -> active_requests
/// GET    /executions/{id}           -> execution_status
/// POST   /executions/{id}/cancel    -> cancel_execution
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(dispatcher::dispatcher_stats))
        .route("/requests", get(dispatcher::active_requests))
        .route("/executions/{id}", get(dispatcher::execution_status))
        .route("/executions/{id}/cancel", post(dispatcher::cancel_execution))
}
