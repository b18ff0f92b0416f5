//! Handlers for the callback surface used by the workflow engine.
//!
//! Result and error callbacks are signed: the handler reads the raw body,
//! authenticates it, validates it against its schema as untyped JSON and
//! only then deserializes it.

use axum::body::Bytes;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use docrelay_core::error::CoreError;
use docrelay_core::payloads::{ErrorHandlingPayload, WebhookResultPayload};
use docrelay_core::schema::names;
use docrelay_core::scheduling::JobStatus;
use docrelay_core::types::EntityId;
use docrelay_store::models::api_key::Permission;
use docrelay_store::models::job::{CallbackOutcome, Job, JobQuery};
use docrelay_webhook::engine::{JobStatusQuery, RemoteJobStatus};

use crate::engine::callbacks;
use crate::error::{AppError, AppResult};
use crate::middleware::api_key::{authenticate_signed, ApiKeyAuth};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `body` as JSON, check it against `schema`, then deserialize it.
fn parse_validated<T: DeserializeOwned>(state: &AppState, body: &[u8], schema: &str) -> AppResult<T> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {e}")))?;

    let report = state.validator.validate_payload(&value, schema)?;
    if !report.valid {
        tracing::warn!(schema, errors = report.errors.len(), "Callback failed schema validation");
        return Err(AppError::SchemaValidation {
            schema: report.schema_name,
            issues: report.errors,
        });
    }

    serde_json::from_value(value).map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))
}

/// What a callback did to its job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    job_id: EntityId,
    status: JobStatus,
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<CallbackOutcome> for CallbackAck {
    fn from(outcome: CallbackOutcome) -> Self {
        match outcome {
            CallbackOutcome::Applied(job) => Self {
                job_id: job.id,
                status: job.status,
                applied: true,
                reason: None,
            },
            CallbackOutcome::Ignored { job, reason } => Self {
                job_id: job.id,
                status: job.status,
                applied: false,
                reason: Some(reason),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// POST /webhook/results
///
/// Progress, completion or failure reported by the engine. Callbacks for
/// cancelled or already finished jobs are acknowledged but not applied.
pub async fn receive_results(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    authenticate_signed(&state, &headers, &method, uri.path(), &body, Permission::SubmitResults).await?;
    let payload: WebhookResultPayload = parse_validated(&state, &body, names::WEBHOOK_RESULT_PAYLOAD)?;

    tracing::debug!(
        job_id = %payload.job_id,
        deal_name = %payload.deal_name,
        status = ?payload.status,
        "Result callback received",
    );
    let outcome = callbacks::process_result(&state.registries, &state.dispatcher, &payload).await?;
    Ok(Json(DataResponse {
        data: CallbackAck::from(outcome),
    }))
}

/// POST /webhook/errors
pub async fn receive_error(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    authenticate_signed(&state, &headers, &method, uri.path(), &body, Permission::SubmitResults).await?;
    let payload: ErrorHandlingPayload = parse_validated(&state, &body, names::ERROR_HANDLING_PAYLOAD)?;

    tracing::debug!(
        job_id = %payload.job_id,
        error_type = %payload.error_type,
        retryable = payload.retryable,
        "Error callback received",
    );
    let outcome = callbacks::process_error(&state.registries, &state.dispatcher, &payload).await?;
    Ok(Json(DataResponse {
        data: CallbackAck::from(outcome),
    }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
    pub job_id: Option<EntityId>,
    pub deal_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum JobStatusView {
    Local { job: Box<Job> },
    Remote { status: RemoteJobStatus },
}

/// GET /webhook/status?jobId=&dealName=
///
/// Answers from the local tracker when it knows the job (or, by deal, the
/// deal's latest job) and falls back to the engine otherwise.
pub async fn job_status(
    auth: ApiKeyAuth,
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> AppResult<impl IntoResponse> {
    auth.require(Permission::ReadStatus)?;
    if params.job_id.is_none() && params.deal_name.is_none() {
        return Err(AppError::BadRequest("jobId or dealName is required".into()));
    }

    let local = match (params.job_id, &params.deal_name) {
        (Some(job_id), _) => state.registries.tracker.get_job(job_id).await,
        (None, Some(deal_name)) => {
            let query = JobQuery {
                deal_name: Some(deal_name.clone()),
                limit: Some(1),
                ..Default::default()
            };
            state.registries.tracker.query_jobs(&query).await.items.into_iter().next()
        }
        (None, None) => None,
    };
    if let Some(job) = local {
        return Ok(Json(DataResponse {
            data: JobStatusView::Local { job: Box::new(job) },
        }));
    }

    let query = JobStatusQuery {
        job_id: params.job_id,
        deal_name: params.deal_name.clone(),
    };
    match state.webhook.query_job_status(&query).await {
        Ok(status) => Ok(Json(DataResponse {
            data: JobStatusView::Remote { status },
        })),
        Err(e) if e.status_code() == Some(404) => Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: params
                .job_id
                .map(|id| id.to_string())
                .or(params.deal_name)
                .unwrap_or_default(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Remote status fallback failed");
            Err(e.into())
        }
    }
}
