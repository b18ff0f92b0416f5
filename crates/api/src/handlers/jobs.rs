//! Handlers for the `/jobs` resource.
//!
//! Reads need `read_status`; retry, cancel and cleanup need `admin`.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use docrelay_core::error::CoreError;
use docrelay_core::types::EntityId;
use docrelay_store::models::job::{Job, JobQuery};
use docrelay_store::models::queue_item::WorkflowSignal;

use crate::engine::dispatcher::{build_payload, DispatchError};
use crate::error::{AppError, AppResult};
use crate::middleware::api_key::{RequireAdminKey, RequireReadStatus};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(state: &AppState, job_id: EntityId) -> AppResult<Job> {
    state
        .registries
        .tracker
        .get_job(job_id)
        .await
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Supports `status`, `deal_name`, `trigger_type`, `limit`, `offset`,
/// `sort_by` and `sort_order` query parameters.
pub async fn list_jobs(
    _auth: RequireReadStatus,
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> AppResult<impl IntoResponse> {
    let page = state.registries.tracker.query_jobs(&query).await;
    Ok(Json(DataResponse { data: page }))
}

/// GET /api/v1/jobs/summary
pub async fn job_summary(
    _auth: RequireReadStatus,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let summary = state.registries.tracker.job_summary().await;
    Ok(Json(DataResponse { data: summary }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    _auth: RequireReadStatus,
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Re-queue a failed job and hand it back to the dispatcher. Returns 409
/// when the job is not failed or its retry budget is spent. While the
/// dispatcher is stopped the job stays queued and is resubmitted on start.
pub async fn retry_job(
    _auth: RequireAdminKey,
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    let job = state.registries.tracker.retry_job(job_id).await?;
    state
        .registries
        .queue
        .synchronize_state(job_id, WorkflowSignal::Retry)
        .await;

    let timeout = state.dispatcher.get_config().await.job_timeout_secs;
    match state
        .dispatcher
        .send_document_analysis_request(build_payload(&job, timeout), &CancellationToken::new())
        .await
    {
        Ok(request) => {
            tracing::info!(job_id = %job_id, request_id = %request.id, "Retried job re-dispatched");
        }
        Err(DispatchError::NotRunning) => {
            tracing::warn!(job_id = %job_id, "Dispatcher stopped, retried job left queued");
        }
        Err(e) => return Err(e.into()),
    }

    let job = find_job(&state, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    pub reason: Option<String>,
}

/// POST /api/v1/jobs/{id}/cancel?reason=
///
/// Cancel a non-terminal job. The state change is immediate; stopping the
/// remote execution is best effort. Returns 409 if the job already finished.
pub async fn cancel_job(
    _auth: RequireAdminKey,
    State(state): State<AppState>,
    Path(job_id): Path<EntityId>,
    Query(params): Query<CancelParams>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .registries
        .tracker
        .cancel_job(job_id, params.reason.as_deref())
        .await?;
    state
        .registries
        .queue
        .synchronize_state(job_id, WorkflowSignal::Failed)
        .await;

    if let Some(request) = state.dispatcher.cancel_job(job_id).await {
        tracing::info!(job_id = %job_id, request_id = %request.id, "Outbound request withdrawn");
    }
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    /// Defaults to `JOB_RETENTION_HOURS`.
    pub age_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub removed: usize,
    pub age_hours: i64,
}

/// POST /api/v1/jobs/cleanup?age_hours=
///
/// Delete terminal jobs last updated more than `age_hours` ago.
pub async fn cleanup_jobs(
    _auth: RequireAdminKey,
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> AppResult<impl IntoResponse> {
    let age_hours = params.age_hours.unwrap_or(state.config.job_retention_hours);
    if age_hours < 0 {
        return Err(AppError::BadRequest("age_hours must not be negative".into()));
    }
    let removed = state.registries.tracker.cleanup_old_jobs(age_hours).await;
    Ok(Json(DataResponse {
        data: CleanupResult { removed, age_hours },
    }))
}
