//! REST client for the workflow engine's webhook and execution endpoints.
//!
//! Every outbound body is serialized once; the same bytes are validated,
//! signed and sent, so the signature always covers exactly what went over
//! the wire.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use docrelay_core::error::CoreError;
use docrelay_core::payloads::{
    BatchProcessingPayload, DocumentWebhookPayload, HealthCheckPayload, UserCorrectionPayload,
};
use docrelay_core::schema::{names, Compatibility, SchemaValidator, ValidationReport};
use docrelay_core::signing::{sign_body, HEADER_API_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use docrelay_core::workflow::{
    execution_path, execution_stop_path, WorkflowType, HEALTH_PATH, JOB_STATUS_PATH,
};

use crate::config::WebhookConfig;
use crate::engine::{
    DispatchReceipt, EngineHealth, JobStatusQuery, RemoteExecutionStatus, RemoteJobStatus,
    WorkflowEngine,
};
use crate::error::WebhookError;

/// HTTP client for one workflow engine.
pub struct WebhookService {
    client: reqwest::Client,
    config: RwLock<WebhookConfig>,
    validator: Arc<SchemaValidator>,
}

impl WebhookService {
    pub fn new(config: WebhookConfig, validator: Arc<SchemaValidator>) -> Result<Self, WebhookError> {
        config.validate()?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            config: RwLock::new(config),
            validator,
        })
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub async fn get_config(&self) -> WebhookConfig {
        self.config.read().await.clone()
    }

    /// Swap in a new configuration; requests already in flight keep the old one.
    pub async fn update_config(&self, config: WebhookConfig) -> Result<(), WebhookError> {
        config.validate()?;
        tracing::info!(base_url = %config.base_url, "Webhook configuration updated");
        *self.config.write().await = config;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound payloads
    // -----------------------------------------------------------------------

    pub async fn send_document_analysis(
        &self,
        payload: &DocumentWebhookPayload,
    ) -> Result<DispatchReceipt, WebhookError> {
        self.post_workflow(payload.workflow_type, payload).await
    }

    pub async fn send_batch(&self, payload: &BatchProcessingPayload) -> Result<DispatchReceipt, WebhookError> {
        self.post_workflow(WorkflowType::BatchProcessing, payload).await
    }

    pub async fn send_user_correction(
        &self,
        payload: &UserCorrectionPayload,
    ) -> Result<DispatchReceipt, WebhookError> {
        self.post_workflow(WorkflowType::UserCorrection, payload).await
    }

    /// Validate a payload without sending it.
    pub fn get_validation_result(
        &self,
        schema_name: &str,
        payload: &serde_json::Value,
    ) -> Result<ValidationReport, CoreError> {
        self.validator.validate_payload(payload, schema_name)
    }

    async fn post_workflow<T: Serialize>(
        &self,
        workflow: WorkflowType,
        payload: &T,
    ) -> Result<DispatchReceipt, WebhookError> {
        let config = self.get_config().await;
        let value = serde_json::to_value(payload)?;

        if config.validate_payload {
            let report = self.validator.validate_payload(&value, workflow.schema_name())?;
            if !report.valid {
                return Err(WebhookError::Validation {
                    schema: report.schema_name,
                    issues: report.errors,
                });
            }
        }

        let body = serde_json::to_vec(&value)?;
        let url = config.url(workflow.endpoint_path());
        let started = Instant::now();

        if config.enable_logging {
            tracing::debug!(url = %url, workflow = workflow.as_str(), bytes = body.len(), "Sending webhook");
        }

        let response = self
            .request(&config, reqwest::Method::POST, &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .headers(signature_headers(&config, &body))
            .body(body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let status_code = response.status().as_u16();
        let text = response.text().await?;
        let body: serde_json::Value = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        if config.enable_logging {
            tracing::debug!(
                url = %url,
                status = status_code,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Webhook accepted",
            );
        }

        Ok(DispatchReceipt {
            status_code,
            execution_id: execution_id_from(&body),
            body,
        })
    }

    // -----------------------------------------------------------------------
    // Status and control
    // -----------------------------------------------------------------------

    /// Ask the engine for a job's status, retrying transient failures up to
    /// `retry_count` times with a linearly growing delay.
    pub async fn query_job_status(&self, query: &JobStatusQuery) -> Result<RemoteJobStatus, WebhookError> {
        let config = self.get_config().await;
        let url = config.url(JOB_STATUS_PATH);
        let attempts = config.retry_count.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_job_status(&config, &url, query).await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(attempt, error = %e, "Job status query failed, retrying");
                    tokio::time::sleep(config.retry_delay() * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_job_status(
        &self,
        config: &WebhookConfig,
        url: &str,
        query: &JobStatusQuery,
    ) -> Result<RemoteJobStatus, WebhookError> {
        let response = self
            .request(config, reqwest::Method::GET, url)
            .query(query)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    pub async fn get_execution_status(&self, execution_id: &str) -> Result<RemoteExecutionStatus, WebhookError> {
        let config = self.get_config().await;
        let response = self
            .request(&config, reqwest::Method::GET, &config.url(&execution_path(execution_id)))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    pub async fn cancel_execution(&self, execution_id: &str) -> Result<(), WebhookError> {
        let config = self.get_config().await;
        let response = self
            .request(&config, reqwest::Method::POST, &config.url(&execution_stop_path(execution_id)))
            .send()
            .await?;
        Self::check_status(response).await?;
        tracing::info!(execution_id, "Execution stop requested");
        Ok(())
    }

    /// Probe the engine and check its version against the compatibility table.
    pub async fn health_check(&self) -> Result<EngineHealth, WebhookError> {
        let config = self.get_config().await;
        let started = Instant::now();
        let response = self
            .request(&config, reqwest::Method::GET, &config.url(HEALTH_PATH))
            .send()
            .await?;
        let payload: serde_json::Value = Self::parse_response(response).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let report = self
            .validator
            .validate_payload(&payload, names::HEALTH_CHECK_PAYLOAD)?;
        if !report.valid {
            return Err(WebhookError::Validation {
                schema: report.schema_name,
                issues: report.errors,
            });
        }
        let payload: HealthCheckPayload = serde_json::from_value(payload)?;

        let compatibility = self.validator.check_compatibility(&payload.version);
        match compatibility {
            Compatibility::Unsupported => {
                return Err(WebhookError::IncompatibleEngine(payload.version));
            }
            Compatibility::Deprecated => {
                tracing::warn!(version = %payload.version, "Workflow engine uses a deprecated API version");
            }
            Compatibility::Supported => {}
        }
        Ok(EngineHealth::from_payload(payload, compatibility, latency_ms))
    }

    pub async fn is_healthy(&self) -> bool {
        match self.health_check().await {
            Ok(health) => health.status != "down",
            Err(e) => {
                tracing::debug!(error = %e, "Workflow engine health check failed");
                false
            }
        }
    }

    // ---- private helpers ----

    fn request(&self, config: &WebhookConfig, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url).timeout(config.timeout());
        match config.api_key.as_deref() {
            Some(key) => builder.header(HEADER_API_KEY, key),
            None => builder,
        }
    }

    /// Ensure the response has a success status code, returning the body
    /// text inside [`WebhookError::ApiError`] otherwise.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, WebhookError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WebhookError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WebhookError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), WebhookError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// `X-Timestamp` and `X-Signature` headers when signing is enabled.
fn signature_headers(config: &WebhookConfig, body: &[u8]) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    let secret = config.auth.shared_secret.as_deref().filter(|s| !s.is_empty());
    if let (true, Some(secret)) = (config.auth.enable_hmac, secret) {
        let signature = sign_body(secret, body);
        let timestamp = Utc::now().timestamp().to_string();
        if let (Ok(sig), Ok(ts)) = (signature.parse(), timestamp.parse()) {
            headers.insert(HEADER_SIGNATURE, sig);
            headers.insert(HEADER_TIMESTAMP, ts);
        }
    }
    headers
}

/// Pull an execution id out of an engine response (string or number).
fn execution_id_from(body: &serde_json::Value) -> Option<String> {
    ["executionId", "execution_id", "id"]
        .iter()
        .filter_map(|key| body.get(key))
        .find_map(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait]
impl WorkflowEngine for WebhookService {
    async fn send_document_analysis(
        &self,
        payload: &DocumentWebhookPayload,
    ) -> Result<DispatchReceipt, WebhookError> {
        WebhookService::send_document_analysis(self, payload).await
    }

    async fn send_batch(&self, payload: &BatchProcessingPayload) -> Result<DispatchReceipt, WebhookError> {
        WebhookService::send_batch(self, payload).await
    }

    async fn get_execution_status(&self, execution_id: &str) -> Result<RemoteExecutionStatus, WebhookError> {
        WebhookService::get_execution_status(self, execution_id).await
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), WebhookError> {
        WebhookService::cancel_execution(self, execution_id).await
    }

    async fn health_check(&self) -> Result<EngineHealth, WebhookError> {
        WebhookService::health_check(self).await
    }
}
