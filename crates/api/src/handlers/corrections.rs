//! Handler forwarding user corrections to the correction workflow.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use docrelay_core::error::CoreError;
use docrelay_core::payloads::UserCorrectionPayload;
use docrelay_core::types::EntityId;
use docrelay_store::models::queue_item::HistoryKind;
use docrelay_webhook::engine::DispatchReceipt;

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::RequireSubmitDocuments;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/corrections`.
#[derive(Debug, Deserialize)]
pub struct SubmitCorrection {
    pub job_id: EntityId,
    /// Document the corrected field belongs to; `None` applies to the job.
    pub document_path: Option<String>,
    pub field_name: String,
    #[serde(default)]
    pub original_value: serde_json::Value,
    pub corrected_value: serde_json::Value,
    pub corrected_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CorrectionAccepted {
    pub job_id: EntityId,
    pub deal_name: String,
    pub receipt: DispatchReceipt,
}

/// POST /api/v1/corrections
///
/// Sends the correction to the engine and records it in the document
/// history of every document it applies to.
pub async fn submit_correction(
    RequireSubmitDocuments(auth): RequireSubmitDocuments,
    State(state): State<AppState>,
    Json(input): Json<SubmitCorrection>,
) -> AppResult<impl IntoResponse> {
    if input.field_name.trim().is_empty() {
        return Err(AppError::BadRequest("field_name must not be empty".into()));
    }
    let job = state
        .registries
        .tracker
        .get_job(input.job_id)
        .await
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: input.job_id.to_string(),
        })?;
    if let Some(path) = &input.document_path {
        if !job.file_paths.contains(path) {
            return Err(AppError::BadRequest(format!(
                "Document '{path}' is not part of job {}",
                job.id
            )));
        }
    }

    let payload = UserCorrectionPayload {
        job_id: job.id,
        deal_name: job.deal_name.clone(),
        document_path: input.document_path.clone(),
        field_name: input.field_name,
        original_value: input.original_value,
        corrected_value: input.corrected_value,
        corrected_by: input.corrected_by.or_else(|| Some(auth.key_id.to_string())),
        timestamp: Utc::now(),
    };
    let receipt = state.webhook.send_user_correction(&payload).await?;

    let record = serde_json::to_value(&payload)
        .map_err(|e| AppError::InternalError(format!("Failed to encode correction: {e}")))?;
    let paths = match &input.document_path {
        Some(path) => vec![path.clone()],
        None => job.file_paths.clone(),
    };
    for path in &paths {
        state
            .registries
            .queue
            .record_history(&job.deal_name, path, HistoryKind::Correction, record.clone())
            .await;
    }

    tracing::info!(
        job_id = %job.id,
        field = %payload.field_name,
        documents = paths.len(),
        "Correction forwarded",
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: CorrectionAccepted {
                job_id: job.id,
                deal_name: job.deal_name,
                receipt,
            },
        }),
    ))
}
