//! Route definitions for the `/queue` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
///
/// ```text
/// GET    /                -> list_queue
/// POST   /                -> submit_documents
/// GET    /history         -> document_history
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(queue::list_queue).post(queue::submit_documents))
        .route("/history", get(queue::document_history))
}
