//! Admin handlers for the payload schema registry.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use docrelay_core::error::CoreError;
use docrelay_core::schema::{Compatibility, CompatibilityInfo, Schema, SchemaInfo};

use crate::error::AppResult;
use crate::middleware::api_key::RequireAdminKey;
use crate::response::DataResponse;
use crate::state::AppState;

fn schema_not_found(name: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Schema",
        id: name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// GET /api/v1/schemas
pub async fn list_schemas(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let infos: Vec<SchemaInfo> = state
        .validator
        .list_schemas()
        .iter()
        .filter_map(|name| state.validator.get_schema_info(name))
        .collect();
    Ok(Json(DataResponse { data: infos }))
}

/// GET /api/v1/schemas/{name}
pub async fn get_schema(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let schema = state
        .validator
        .get_schema(&name)
        .ok_or_else(|| schema_not_found(&name))?;
    Ok(Json(DataResponse { data: schema }))
}

/// GET /api/v1/schemas/{name}/info
pub async fn get_schema_info(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let info = state
        .validator
        .get_schema_info(&name)
        .ok_or_else(|| schema_not_found(&name))?;
    Ok(Json(DataResponse { data: info }))
}

/// Request body for `PUT /api/v1/schemas/{name}`.
#[derive(Debug, Deserialize)]
pub struct SchemaUpdate {
    /// Defaults to the current API version.
    #[serde(default)]
    pub version: String,
    pub definition: serde_json::Value,
}

/// PUT /api/v1/schemas/{name}
///
/// Replace or register a schema. Later validations use it immediately.
pub async fn update_schema(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<SchemaUpdate>,
) -> AppResult<impl IntoResponse> {
    let schema = state.validator.update_schema(Schema {
        name,
        version: input.version,
        definition: input.definition,
        last_updated: Utc::now(),
    })?;
    tracing::info!(schema = %schema.name, version = %schema.version, "Schema updated");
    Ok(Json(DataResponse { data: schema }))
}

/// POST /api/v1/schemas/{name}/validate
///
/// Dry-run a payload against a schema. Invalid payloads still answer 200;
/// the verdict is in the report.
pub async fn validate_payload(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<impl IntoResponse> {
    let report = state.validator.validate_payload(&payload, &name)?;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// Modes and compatibility
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CompatibilityView {
    #[serde(flatten)]
    pub info: CompatibilityInfo,
    pub strict_mode: bool,
    /// Verdict for the engine version seen by the last health probe.
    pub engine_version: Option<String>,
    pub engine_compatibility: Option<Compatibility>,
}

/// GET /api/v1/schemas/compatibility
pub async fn compatibility(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let engine_version = state
        .dispatcher
        .get_stats()
        .await
        .last_health_check
        .and_then(|check| check.engine_version);
    let engine_compatibility = engine_version
        .as_deref()
        .map(|v| state.validator.check_compatibility(v));

    Ok(Json(DataResponse {
        data: CompatibilityView {
            info: state.validator.compatibility_info(),
            strict_mode: state.validator.is_strict(),
            engine_version,
            engine_compatibility,
        },
    }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StrictMode {
    pub strict: bool,
}

/// PUT /api/v1/schemas/strict-mode
///
/// In strict mode fields a schema does not declare are errors, not warnings.
pub async fn set_strict_mode(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Json(input): Json<StrictMode>,
) -> AppResult<impl IntoResponse> {
    state.validator.set_strict_mode(input.strict);
    tracing::info!(strict = input.strict, "Schema strict mode changed");
    Ok(Json(DataResponse {
        data: StrictMode {
            strict: state.validator.is_strict(),
        },
    }))
}
