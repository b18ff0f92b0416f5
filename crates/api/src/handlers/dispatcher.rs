//! Admin handlers for inspecting and steering the dispatcher.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use docrelay_core::types::EntityId;

use crate::error::AppResult;
use crate::middleware::api_key::RequireAdminKey;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/dispatcher/stats
pub async fn dispatcher_stats(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let stats = state.dispatcher.get_stats().await;
    Ok(Json(DataResponse { data: stats }))
}

/// GET /api/v1/dispatcher/requests
///
/// Requests still queued, in flight, retrying or awaiting their callback.
pub async fn active_requests(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let requests = state.dispatcher.get_active_requests().await;
    Ok(Json(DataResponse { data: requests }))
}

/// GET /api/v1/dispatcher/executions/{id}
pub async fn execution_status(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state.dispatcher.get_workflow_status(&execution_id).await?;
    Ok(Json(DataResponse { data: status }))
}

#[derive(Debug, Serialize)]
pub struct CancelledExecution {
    pub execution_id: String,
    /// The local job the execution belonged to, if it was still tracked.
    pub job_id: Option<EntityId>,
}

/// POST /api/v1/dispatcher/executions/{id}/cancel
pub async fn cancel_execution(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = state.dispatcher.cancel_workflow(&execution_id).await?;
    tracing::info!(execution_id = %execution_id, job_id = ?job_id, "Execution cancelled");
    Ok(Json(DataResponse {
        data: CancelledExecution { execution_id, job_id },
    }))
}
