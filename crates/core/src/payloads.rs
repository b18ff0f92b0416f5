//! Typed payloads exchanged with the remote workflow engine.
//!
//! Every struct here has a matching schema in [`crate::schema`]; inbound
//! bodies are schema-validated as raw JSON first and only then deserialized
//! into these types.

use serde::{Deserialize, Serialize};

use crate::scheduling::{Priority, TriggerType};
use crate::types::{EntityId, Timestamp};
use crate::workflow::WorkflowType;

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Body of a single document-analysis dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWebhookPayload {
    pub deal_name: String,
    pub file_paths: Vec<String>,
    pub trigger_type: TriggerType,
    pub workflow_type: WorkflowType,
    pub job_id: EntityId,
    pub priority: Priority,
    pub timestamp: Timestamp,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

/// Several document dispatches sent as one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessingPayload {
    pub batch_id: EntityId,
    pub jobs: Vec<DocumentWebhookPayload>,
    pub total_jobs: u32,
    pub priority: Priority,
    pub timestamp: Timestamp,
}

impl BatchProcessingPayload {
    /// Wrap a set of dispatches; batch priority is the highest member priority.
    pub fn new(batch_id: EntityId, jobs: Vec<DocumentWebhookPayload>, timestamp: Timestamp) -> Self {
        let priority = jobs
            .iter()
            .map(|j| j.priority)
            .max()
            .unwrap_or_default();
        Self {
            batch_id,
            total_jobs: jobs.len() as u32,
            jobs,
            priority,
            timestamp,
        }
    }
}

/// A user's correction of an extracted field, forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCorrectionPayload {
    pub job_id: EntityId,
    pub deal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<String>,
    pub field_name: String,
    #[serde(default)]
    pub original_value: serde_json::Value,
    pub corrected_value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_by: Option<String>,
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Status reported by a result callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Processing,
    Completed,
    Failed,
}

/// Per-document outcome inside a result callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub document_path: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_extracted: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /webhook/results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResultPayload {
    pub job_id: EntityId,
    pub deal_name: String,
    pub workflow_type: WorkflowType,
    pub status: ResultStatus,
    pub processed_documents: u32,
    pub total_documents: u32,
    pub average_confidence: f64,
    pub processing_time_ms: u64,
    pub templates_updated: Vec<String>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub document_results: Vec<DocumentResult>,
}

/// Body of `POST /webhook/errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingPayload {
    pub job_id: EntityId,
    pub deal_name: String,
    pub error_type: String,
    pub error_message: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default = "empty_object")]
    pub context: serde_json::Value,
}

/// Body returned by the remote engine's health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPayload {
    pub status: String,
    pub version: String,
    pub timestamp: Timestamp,
    #[serde(default = "empty_object")]
    pub services: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dispatch(priority: Priority) -> DocumentWebhookPayload {
        DocumentWebhookPayload {
            deal_name: "Acme Tower".into(),
            file_paths: vec!["/deals/acme/rent_roll.pdf".into()],
            trigger_type: TriggerType::Manual,
            workflow_type: WorkflowType::DocumentAnalysis,
            job_id: crate::types::new_id(),
            priority,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries: 3,
            timeout_seconds: 30,
            metadata: empty_object(),
        }
    }

    #[test]
    fn dispatch_serializes_camel_case() {
        let json = serde_json::to_value(dispatch(Priority::High)).unwrap();
        assert_eq!(json["dealName"], "Acme Tower");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["triggerType"], "manual");
        assert!(json.get("deal_name").is_none());
    }

    #[test]
    fn batch_takes_highest_member_priority() {
        let batch = BatchProcessingPayload::new(
            crate::types::new_id(),
            vec![dispatch(Priority::Low), dispatch(Priority::High)],
            Utc::now(),
        );
        assert_eq!(batch.priority, Priority::High);
        assert_eq!(batch.total_jobs, 2);
    }

    #[test]
    fn result_payload_optional_fields_default() {
        let json = serde_json::json!({
            "jobId": crate::types::new_id(),
            "dealName": "Acme Tower",
            "workflowType": "document_analysis",
            "status": "completed",
            "processedDocuments": 2,
            "totalDocuments": 2,
            "averageConfidence": 0.91,
            "processingTimeMs": 5400,
            "templatesUpdated": ["underwriting.xlsx"],
            "timestamp": "2024-05-01T12:00:00Z",
        });
        let parsed: WebhookResultPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.status, ResultStatus::Completed);
        assert!(parsed.errors.is_empty());
        assert!(parsed.document_results.is_empty());
        assert!(parsed.execution_id.is_none());
    }
}
