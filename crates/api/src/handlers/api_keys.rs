//! Admin handlers for API key management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use docrelay_core::error::CoreError;
use docrelay_core::types::EntityId;

use crate::auth::GenerateApiKey;
use crate::error::AppResult;
use crate::middleware::api_key::RequireAdminKey;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/api-keys
pub async fn list_api_keys(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let keys = state.auth.list_api_keys().await;
    Ok(Json(DataResponse { data: keys }))
}

/// POST /api/v1/api-keys
///
/// The response is the only time the raw key and signing secret are shown.
pub async fn create_api_key(
    RequireAdminKey(admin): RequireAdminKey,
    State(state): State<AppState>,
    Json(input): Json<GenerateApiKey>,
) -> AppResult<impl IntoResponse> {
    if input.name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()).into());
    }
    let generated = state.auth.generate_api_key(input).await?;
    tracing::info!(
        key_id = %generated.key_id,
        issued_by = %admin.key_id,
        "API key issued",
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: generated })))
}

/// GET /api/v1/api-keys/{id}
pub async fn get_api_key(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(key_id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    let info = state.auth.get_api_key_info(key_id).await?;
    Ok(Json(DataResponse { data: info }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeParams {
    pub reason: Option<String>,
}

/// DELETE /api/v1/api-keys/{id}?reason=
///
/// Revokes the key. The record stays listed as inactive.
pub async fn revoke_api_key(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(key_id): Path<EntityId>,
    Query(params): Query<RevokeParams>,
) -> AppResult<impl IntoResponse> {
    let info = state.auth.revoke_api_key(key_id, params.reason).await?;
    Ok(Json(DataResponse { data: info }))
}
