use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use docrelay_core::error::CoreError;
use docrelay_core::schema::ValidationIssue;
use docrelay_store::StoreError;
use docrelay_webhook::WebhookError;

use crate::engine::dispatcher::DispatchError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `docrelay_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failure talking to the workflow engine.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An inbound payload failed schema validation.
    #[error("Payload failed '{schema}' validation")]
    SchemaValidation {
        schema: String,
        issues: Vec<ValidationIssue>,
    },

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Core(err.into())
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Core(core) => classify_core_error(&core),
            AppError::Webhook(err) => classify_webhook_error(&err),
            AppError::Dispatch(err) => match err {
                DispatchError::AlreadyRunning => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                DispatchError::NotRunning => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    err.to_string(),
                ),
                DispatchError::UnknownJob(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                DispatchError::InvalidConfig(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
                }
                DispatchError::Store(store) => classify_core_error(&CoreError::from(store)),
                DispatchError::Webhook(webhook) => classify_webhook_error(&webhook),
            },

            // --- Schema failures carry the offending fields ---
            AppError::SchemaValidation { schema, issues } => {
                let body = json!({
                    "error": format!("Payload failed '{schema}' validation"),
                    "code": "SCHEMA_VALIDATION_FAILED",
                    "details": issues,
                });
                return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Classify a workflow-engine error.
///
/// - Outbound schema failures map to 400.
/// - Engine and transport failures map to 502.
/// - Everything else maps to 500 with a sanitized message.
fn classify_webhook_error(err: &WebhookError) -> (StatusCode, &'static str, String) {
    match err {
        WebhookError::Validation { .. } => (
            StatusCode::BAD_REQUEST,
            "SCHEMA_VALIDATION_FAILED",
            err.to_string(),
        ),
        WebhookError::InvalidConfig(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        WebhookError::Request(_) | WebhookError::ApiError { .. } | WebhookError::IncompatibleEngine(_) => {
            tracing::warn!(error = %err, "Workflow engine call failed");
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", err.to_string())
        }
        WebhookError::Core(core) => classify_core_error(core),
        WebhookError::Serialization(_) => {
            tracing::error!(error = %err, "Webhook serialization error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
