//! Route definitions for runtime configuration. All routes require `admin`.

use axum::routing::get;
use axum::Router;

use crate::handlers::config;
use crate::state::AppState;

/// Routes mounted at `/config`.
///
/// ```text
/// GET    /webhook         -> get_webhook_config
/// PUT    /webhook         -> update_webhook_config
/// GET    /dispatcher      -> get_dispatcher_config
/// PUT    /dispatcher      -> update_dispatcher_config
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhook",
            get(config::get_webhook_config).put(config::update_webhook_config),
        )
        .route(
            "/dispatcher",
            get(config::get_dispatcher_config).put(config::update_dispatcher_config),
        )
}
