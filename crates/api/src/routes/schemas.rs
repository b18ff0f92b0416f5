//! Route definitions for the schema registry. All routes require `admin`.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::schemas;
use crate::state::AppState;

/// Routes mounted at `/schemas`.
///
/// ```text
/// GET    /                    -> list_schemas
/// GET    /compatibility       -> compatibility
/// PUT    /strict-mode         -> set_strict_mode
/// GET    /{name}              -> get_schema
/// PUT    /{name}              -> update_schema
/// GET    /{name}/info         -> get_schema_info
/// POST   /{name}/validate     -> validate_payload
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(schemas::list_schemas))
        .route("/compatibility", get(schemas::compatibility))
        .route("/strict-mode", put(schemas::set_strict_mode))
        .route("/{name}", get(schemas::get_schema).put(schemas::update_schema))
        .route("/{name}/info", get(schemas::get_schema_info))
        .route("/{name}/validate", post(schemas::validate_payload))
}
