//! Route definitions for API key management. All routes require `admin`.

use axum::routing::get;
use axum::Router;

use crate::handlers::api_keys;
use crate::state::AppState;

/// Routes mounted at `/api-keys`.
///
/// ```text
/// GET    /                -> list_api_keys
/// POST   /                -> create_api_key
/// GET    /{id}            -> get_api_key
/// DELETE /{id}            -> revoke_api_key
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(api_keys::list_api_keys).post(api_keys::create_api_key))
        .route("/{id}", get(api_keys::get_api_key).delete(api_keys::revoke_api_key))
}
