//! Job entity models and DTOs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use docrelay_core::payloads::DocumentResult;
use docrelay_core::scheduling::{JobStatus, Priority, TriggerType};
use docrelay_core::types::{EntityId, Timestamp};
use docrelay_core::workflow::WorkflowType;

/// One document-analysis job tracked from submission to terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: EntityId,
    pub deal_name: String,
    pub trigger_type: TriggerType,
    pub workflow_type: WorkflowType,
    pub priority: Priority,
    pub file_paths: Vec<String>,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    pub current_step: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub estimated_duration_secs: u64,
    pub estimated_remaining_secs: Option<u64>,
    pub processed_documents: u32,
    pub total_documents: u32,
    pub queue_position: Option<usize>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Execution id assigned by the workflow engine on dispatch.
    pub execution_id: Option<String>,
    pub error_message: Option<String>,
    pub history: Vec<JobHistoryEntry>,
    pub metadata: serde_json::Value,
    pub results: Option<ProcessingResults>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// One entry in a job's append-only history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    pub timestamp: Timestamp,
    pub status: JobStatus,
    pub step: Option<String>,
    pub message: String,
    pub progress: u8,
    pub error: Option<String>,
}

/// Final results merged from a completion callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResults {
    pub documents_processed: u32,
    pub templates_updated: Vec<String>,
    pub average_confidence: f64,
    pub processing_time_ms: u64,
    pub document_results: Vec<DocumentResult>,
    pub errors: Vec<String>,
}

/// DTO for creating a job.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub deal_name: String,
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub priority: Priority,
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Incremental progress report.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub progress: Option<u8>,
    pub step: Option<String>,
    pub processed_documents: Option<u32>,
    pub total_documents: Option<u32>,
    pub execution_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Progress,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub deal_name: Option<String>,
    pub trigger_type: Option<TriggerType>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub sort_by: JobSortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

/// One page of `query_jobs` results.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// History entry annotated with the job it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub job_id: EntityId,
    pub deal_name: String,
    #[serde(flatten)]
    pub entry: JobHistoryEntry,
}

/// Dashboard view over every tracked job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total: usize,
    /// Count per status; every status is present.
    pub by_status: BTreeMap<String, usize>,
    pub average_active_progress: f64,
    /// Progress points per second of recently completed jobs (EWMA).
    pub throughput_ewma: Option<f64>,
    pub recent_activity: Vec<ActivityEntry>,
}

/// What happened to a callback merged into the tracker.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Applied(Job),
    /// Recorded in history without changing state.
    Ignored { job: Job, reason: String },
}

impl CallbackOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Applied(job) | Self::Ignored { job, .. } => job,
        }
    }
}

/// Result of recording a failed dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The job has budget left; `attempt` is the updated retry count.
    WillRetry { attempt: u32 },
    /// The retry budget is spent and the job is now failed.
    Exhausted,
}
