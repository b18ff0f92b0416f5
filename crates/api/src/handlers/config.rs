//! Admin handlers for runtime configuration.
//!
//! Secrets in the webhook configuration are redacted on read. Sending a
//! redacted value back keeps the stored secret.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use docrelay_webhook::WebhookConfig;

use crate::engine::dispatcher::DispatcherConfig;
use crate::error::AppResult;
use crate::middleware::api_key::RequireAdminKey;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// GET /api/v1/config/webhook
pub async fn get_webhook_config(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let config = state.webhook.get_config().await;
    Ok(Json(DataResponse {
        data: config.redacted(),
    }))
}

/// PUT /api/v1/config/webhook
///
/// Replaces the whole configuration. Invalid input leaves the current one
/// in place and answers 400.
pub async fn update_webhook_config(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Json(input): Json<WebhookConfig>,
) -> AppResult<impl IntoResponse> {
    let current = state.webhook.get_config().await;
    let config = input.keep_redacted_secrets(&current);
    state.webhook.update_config(config).await?;

    let updated = state.webhook.get_config().await;
    Ok(Json(DataResponse {
        data: updated.redacted(),
    }))
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// GET /api/v1/config/dispatcher
pub async fn get_dispatcher_config(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let config = state.dispatcher.get_config().await;
    Ok(Json(DataResponse { data: config }))
}

/// PUT /api/v1/config/dispatcher
///
/// A new `max_concurrent_jobs` takes effect on the next dispatcher start.
pub async fn update_dispatcher_config(
    _admin: RequireAdminKey,
    State(state): State<AppState>,
    Json(input): Json<DispatcherConfig>,
) -> AppResult<impl IntoResponse> {
    state.dispatcher.update_config(input).await?;
    let config = state.dispatcher.get_config().await;
    Ok(Json(DataResponse { data: config }))
}
