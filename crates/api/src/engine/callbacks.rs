//! Applies inbound workflow-engine callbacks to jobs, queue items and the
//! dispatcher's request pool.
//!
//! The tracker decides whether a callback changes state; this module only
//! fans an applied outcome out to the queue (status sync and document
//! history) and releases the dispatcher request on terminal outcomes.

use serde_json::json;

use docrelay_core::payloads::{ErrorHandlingPayload, ResultStatus, WebhookResultPayload};
use docrelay_core::scheduling::JobStatus;
use docrelay_store::models::job::{CallbackOutcome, Job};
use docrelay_store::models::queue_item::{HistoryKind, WorkflowSignal};
use docrelay_store::StoreError;

use super::dispatcher::Dispatcher;
use crate::state::Registries;

/// Merge a result callback.
pub async fn process_result(
    registries: &Registries,
    dispatcher: &Dispatcher,
    payload: &WebhookResultPayload,
) -> Result<CallbackOutcome, StoreError> {
    let outcome = registries.tracker.apply_callback(payload).await?;
    let CallbackOutcome::Applied(job) = &outcome else {
        return Ok(outcome);
    };
    let queue = &registries.queue;

    match payload.status {
        ResultStatus::Processing => {
            queue.synchronize_state(job.id, WorkflowSignal::Processing).await;
            tracing::debug!(job_id = %job.id, progress = job.progress, "Progress callback applied");
        }
        ResultStatus::Completed => {
            queue.synchronize_state(job.id, WorkflowSignal::Completed).await;
            record_analysis(registries, job, payload).await;
            dispatcher.acknowledge(job.id, true).await;
            tracing::info!(
                job_id = %job.id,
                processed = job.processed_documents,
                total = job.total_documents,
                "Job completed by workflow engine",
            );
        }
        ResultStatus::Failed => {
            queue.synchronize_state(job.id, WorkflowSignal::Failed).await;
            let error = job.error_message.clone().unwrap_or_default();
            record_errors(registries, job, &error).await;
            dispatcher.acknowledge(job.id, false).await;
            tracing::warn!(job_id = %job.id, %error, "Job failed in workflow engine");
        }
    }
    Ok(outcome)
}

/// Merge an error callback. Retryable errors leave the job running and
/// only flag its queue items as retrying.
pub async fn process_error(
    registries: &Registries,
    dispatcher: &Dispatcher,
    payload: &ErrorHandlingPayload,
) -> Result<CallbackOutcome, StoreError> {
    let outcome = registries.tracker.apply_error_callback(payload).await?;
    let CallbackOutcome::Applied(job) = &outcome else {
        return Ok(outcome);
    };

    if payload.retryable && job.status != JobStatus::Failed {
        registries
            .queue
            .synchronize_state(job.id, WorkflowSignal::Retry)
            .await;
        tracing::info!(job_id = %job.id, error_type = %payload.error_type, "Retryable workflow error reported");
        return Ok(outcome);
    }

    registries
        .queue
        .synchronize_state(job.id, WorkflowSignal::Failed)
        .await;
    let error = format!("{}: {}", payload.error_type, payload.error_message);
    record_errors(registries, job, &error).await;
    dispatcher.acknowledge(job.id, false).await;
    tracing::warn!(job_id = %job.id, %error, "Workflow error reported");
    Ok(outcome)
}

/// One analysis entry per document; per-document results win over the
/// job-level summary when the engine sent them.
async fn record_analysis(registries: &Registries, job: &Job, payload: &WebhookResultPayload) {
    for path in &job.file_paths {
        let document = payload
            .document_results
            .iter()
            .find(|r| &r.document_path == path);
        let results = match document {
            Some(result) => json!({
                "jobId": job.id,
                "status": result.status,
                "confidence": result.confidence,
                "fieldsExtracted": result.fields_extracted,
                "error": result.error,
            }),
            None => json!({
                "jobId": job.id,
                "status": "completed",
                "confidence": payload.average_confidence,
                "templatesUpdated": payload.templates_updated,
            }),
        };
        registries
            .queue
            .record_history(&job.deal_name, path, HistoryKind::Analysis, results)
            .await;
    }
}

async fn record_errors(registries: &Registries, job: &Job, error: &str) {
    for path in &job.file_paths {
        registries
            .queue
            .record_history(
                &job.deal_name,
                path,
                HistoryKind::Error,
                json!({ "jobId": job.id, "error": error }),
            )
            .await;
    }
}
