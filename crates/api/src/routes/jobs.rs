//! Route definitions for the `/jobs` resource.
//!
//! Reads need `read_status`; mutations need `admin`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// GET    /summary         -> job_summary
/// POST   /cleanup         -> cleanup_jobs
/// GET    /{id}            -> get_job
/// POST   /{id}/retry      -> retry_job
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/summary", get(jobs::job_summary))
        .route("/cleanup", post(jobs::cleanup_jobs))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/retry", post(jobs::retry_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
}
