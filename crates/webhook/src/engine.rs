//! The seam between the dispatcher and the remote workflow engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docrelay_core::payloads::{BatchProcessingPayload, DocumentWebhookPayload, HealthCheckPayload};
use docrelay_core::schema::Compatibility;
use docrelay_core::types::{EntityId, Timestamp};

use crate::error::WebhookError;

/// What the engine answered when it accepted a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReceipt {
    pub status_code: u16,
    /// Execution id from the response body, when the engine sent one.
    pub execution_id: Option<String>,
    pub body: serde_json::Value,
}

/// Execution record from `GET /api/v1/executions/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteExecutionStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub stopped_at: Option<Timestamp>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Query parameters for the engine's job-status webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_name: Option<String>,
}

/// Job status as reported by the engine's job-status webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteJobStatus {
    pub job_id: Option<EntityId>,
    pub deal_name: Option<String>,
    pub status: String,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub processed_documents: Option<u32>,
    pub total_documents: Option<u32>,
    pub error_message: Option<String>,
    pub updated_at: Option<Timestamp>,
}

/// Result of probing the engine's health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineHealth {
    pub status: String,
    pub version: String,
    pub compatibility: Compatibility,
    pub latency_ms: u64,
    pub services: serde_json::Value,
}

impl EngineHealth {
    pub fn from_payload(payload: HealthCheckPayload, compatibility: Compatibility, latency_ms: u64) -> Self {
        Self {
            status: payload.status,
            version: payload.version,
            compatibility,
            latency_ms,
            services: payload.services,
        }
    }
}

/// Operations the dispatcher needs from a workflow engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn send_document_analysis(
        &self,
        payload: &DocumentWebhookPayload,
    ) -> Result<DispatchReceipt, WebhookError>;

    async fn send_batch(&self, payload: &BatchProcessingPayload) -> Result<DispatchReceipt, WebhookError>;

    async fn get_execution_status(&self, execution_id: &str) -> Result<RemoteExecutionStatus, WebhookError>;

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), WebhookError>;

    /// Probe the engine; incompatible versions are an error.
    async fn health_check(&self) -> Result<EngineHealth, WebhookError>;
}
