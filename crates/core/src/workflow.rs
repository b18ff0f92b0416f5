//! Workflow kinds understood by the remote engine and their routing table.
//!
//! Each kind maps to exactly one webhook path and one payload schema. Adding
//! a kind means adding a variant here; every `match` below then fails to
//! compile until the new route is defined.

use serde::{Deserialize, Serialize};

use crate::schema::names;

/// Path polled for job status on the remote engine.
pub const JOB_STATUS_PATH: &str = "/webhook/job-status";

/// Path probed by health checks on the remote engine.
pub const HEALTH_PATH: &str = "/healthz";

/// Workflow kinds routed to the remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    DocumentAnalysis,
    BatchProcessing,
    UserCorrection,
    ErrorHandling,
}

impl Default for WorkflowType {
    fn default() -> Self {
        Self::DocumentAnalysis
    }
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentAnalysis => "document_analysis",
            Self::BatchProcessing => "batch_processing",
            Self::UserCorrection => "user_correction",
            Self::ErrorHandling => "error_handling",
        }
    }

    /// Webhook path (relative to the engine base URL) for this workflow.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Self::DocumentAnalysis => "/webhook/document-analysis",
            Self::BatchProcessing => "/webhook/batch-processing",
            Self::UserCorrection => "/webhook/user-correction",
            Self::ErrorHandling => "/webhook/error-handling",
        }
    }

    /// Name of the schema outbound payloads of this workflow must satisfy.
    pub fn schema_name(&self) -> &'static str {
        match self {
            Self::DocumentAnalysis => names::DOCUMENT_WEBHOOK_PAYLOAD,
            Self::BatchProcessing => names::BATCH_PROCESSING_PAYLOAD,
            Self::UserCorrection => names::USER_CORRECTION_PAYLOAD,
            Self::ErrorHandling => names::ERROR_HANDLING_PAYLOAD,
        }
    }
}

/// Path for querying a single execution.
pub fn execution_path(execution_id: &str) -> String {
    format!("/api/v1/executions/{execution_id}")
}

/// Path for stopping a single execution.
pub fn execution_stop_path(execution_id: &str) -> String {
    format!("/api/v1/executions/{execution_id}/stop")
}
