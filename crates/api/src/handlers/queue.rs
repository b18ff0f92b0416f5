//! Handlers for the `/queue` resource.
//!
//! Submission accepts keys with `submit_documents`; reads need
//! `read_status`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use docrelay_core::scheduling::Priority;
use docrelay_store::models::queue_item::{HistoryQuery, NewQueueItem, QueueFilter, QueueItem, QueueStats};

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::{RequireReadStatus, RequireSubmitDocuments};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/queue`.
#[derive(Debug, Deserialize)]
pub struct SubmitDocuments {
    pub deal_name: String,
    pub document_paths: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct QueuedDocument {
    #[serde(flatten)]
    pub item: QueueItem,
    /// 1-based position among pending items at submission time.
    pub position: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueListing {
    pub items: Vec<QueueItem>,
    pub stats: QueueStats,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/queue
///
/// Enqueue one or more documents of a deal. All-or-nothing: one duplicate
/// rejects the whole submission with 409.
pub async fn submit_documents(
    RequireSubmitDocuments(auth): RequireSubmitDocuments,
    State(state): State<AppState>,
    Json(input): Json<SubmitDocuments>,
) -> AppResult<impl IntoResponse> {
    if input.document_paths.is_empty() {
        return Err(AppError::BadRequest("document_paths must not be empty".into()));
    }

    let inputs = input
        .document_paths
        .iter()
        .map(|path| NewQueueItem {
            deal_name: input.deal_name.clone(),
            document_path: path.clone(),
            priority: input.priority,
            metadata: input.metadata.clone(),
        })
        .collect();
    let items = state.registries.queue.enqueue_many(inputs).await?;

    let mut queued = Vec::with_capacity(items.len());
    for item in items {
        let position = state.registries.queue.position_of(item.id).await;
        queued.push(QueuedDocument { item, position });
    }

    tracing::info!(
        deal_name = %input.deal_name,
        count = queued.len(),
        priority = input.priority.as_str(),
        key_id = %auth.key_id,
        "Documents submitted",
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: queued })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/queue
///
/// Items in dispatch order plus aggregate counts. Supports `deal_name`,
/// `status`, `priority` and `limit` query parameters.
pub async fn list_queue(
    _auth: RequireReadStatus,
    State(state): State<AppState>,
    Query(filter): Query<QueueFilter>,
) -> AppResult<impl IntoResponse> {
    let queue = &state.registries.queue;
    let listing = QueueListing {
        items: queue.query(&filter).await,
        stats: queue.stats().await,
    };
    Ok(Json(DataResponse { data: listing }))
}

/// GET /api/v1/queue/history?deal_name=&document_path=
pub async fn document_history(
    _auth: RequireReadStatus,
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> AppResult<impl IntoResponse> {
    let history = state
        .registries
        .queue
        .history_for(&params.deal_name, params.document_path.as_deref())
        .await;
    Ok(Json(DataResponse { data: history }))
}
