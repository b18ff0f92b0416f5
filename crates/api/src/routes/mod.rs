pub mod api_keys;
pub mod config;
pub mod corrections;
pub mod dispatcher;
pub mod health;
pub mod jobs;
pub mod queue;
pub mod schemas;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /queue                                   list, submit
/// /queue/history                           document history
///
/// /jobs                                    list
/// /jobs/summary                            counts per status
/// /jobs/cleanup                            delete old terminal jobs (POST)
/// /jobs/{id}                               get
/// /jobs/{id}/retry                         re-dispatch a failed job (POST)
/// /jobs/{id}/cancel                        cancel (POST)
///
/// /corrections                             forward a user correction (POST)
///
/// /dispatcher/stats                        counters and health
/// /dispatcher/requests                     active outbound requests
/// /dispatcher/executions/{id}              remote execution status
/// /dispatcher/executions/{id}/cancel       stop a remote execution (POST)
///
/// /api-keys                                list, create
/// /api-keys/{id}                           get, revoke (DELETE)
///
/// /schemas                                 list
/// /schemas/compatibility                   version table
/// /schemas/strict-mode                     toggle (PUT)
/// /schemas/{name}                          get, replace (PUT)
/// /schemas/{name}/info                     summary
/// /schemas/{name}/validate                 dry-run validation (POST)
///
/// /config/webhook                          get, update
/// /config/dispatcher                       get, update
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/queue", queue::router())
        .nest("/jobs", jobs::router())
        .nest("/corrections", corrections::router())
        .nest("/dispatcher", dispatcher::router())
        .nest("/api-keys", api_keys::router())
        .nest("/schemas", schemas::router())
        .nest("/config", config::router())
}
