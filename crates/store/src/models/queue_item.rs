//! Queue item and document history models.

use serde::{Deserialize, Serialize};

use docrelay_core::scheduling::Priority;
use docrelay_core::types::{EntityId, Timestamp};

/// Lifecycle of one queued document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Items in these states block a second submission of the same document.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A document waiting for (or undergoing) analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: EntityId,
    /// Set once the feeder has created a job for this item.
    pub job_id: Option<EntityId>,
    pub deal_name: String,
    pub document_path: String,
    pub document_name: String,
    pub priority: Priority,
    pub enqueued_at: Timestamp,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub estimated_duration_secs: u32,
    pub actual_duration_secs: Option<u64>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub metadata: serde_json::Value,
}

/// DTO for `POST /api/v1/queue`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewQueueItem {
    pub deal_name: String,
    pub document_path: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters for `GET /api/v1/queue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    pub deal_name: Option<String>,
    pub status: Option<QueueItemStatus>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
}

/// Outcome reported by the workflow engine, mapped onto queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowSignal {
    Processing,
    Completed,
    Failed,
    Retry,
}

/// Aggregate counts for the queue listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of estimates for every pending item.
    pub estimated_wait_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Analysis,
    Correction,
    Error,
}

/// A result, correction or error recorded against one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHistoryEntry {
    pub deal_name: String,
    pub document_path: String,
    pub kind: HistoryKind,
    pub results: serde_json::Value,
    pub recorded_at: Timestamp,
}

/// Query parameters for `GET /api/v1/queue/history`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub deal_name: String,
    pub document_path: Option<String>,
}
