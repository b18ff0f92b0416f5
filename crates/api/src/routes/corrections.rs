use axum::routing::post;
use axum::Router;

use crate::handlers::corrections;
use crate::state::AppState;

/// Routes mounted at `/corrections`.
///
/// ```text
/// POST   /                -> submit_correction
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(corrections::submit_correction))
}
