//! Authoritative job lifecycle store.
//!
//! Every mutation goes through [`JobTracker::mutate`], which validates the
//! requested change against the state machine, stamps `updated_at` and
//! appends exactly one history entry. Status only moves forward except for
//! an explicit retry (`failed -> queued`) or cancel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use docrelay_core::estimation::estimate_total_secs;
use docrelay_core::payloads::{ErrorHandlingPayload, ResultStatus, WebhookResultPayload};
use docrelay_core::scheduling::{state_machine, JobStatus};
use docrelay_core::types::{new_id, EntityId};

use crate::error::StoreError;
use crate::models::job::{
    ActivityEntry, AttemptOutcome, CallbackOutcome, Job, JobHistoryEntry, JobPage, JobQuery,
    JobSortField, JobSummary, NewJob, ProcessingResults, ProgressUpdate, SortOrder,
};

/// Maximum page size for job listing.
const MAX_LIMIT: usize = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: usize = 50;

/// Entries returned in the summary's activity feed.
const RECENT_ACTIVITY_LIMIT: usize = 20;

/// Smoothing factor for the throughput EWMA.
const THROUGHPUT_ALPHA: f64 = 0.2;

#[derive(Debug, Default)]
struct TrackerState {
    jobs: HashMap<EntityId, Job>,
    throughput_ewma: Option<f64>,
}

/// What one history entry should say about a mutation.
struct Note {
    message: String,
    error: Option<String>,
}

impl Note {
    fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: Some(error.into()),
        }
    }
}

fn transition(job: &mut Job, to: JobStatus) -> Result<(), StoreError> {
    if job.status == to {
        return Ok(());
    }
    state_machine::validate_transition(job.status, to).map_err(|_| StoreError::InvalidTransition {
        from: job.status,
        to,
    })?;
    job.status = to;
    Ok(())
}

fn ensure_active(job: &Job) -> Result<(), StoreError> {
    if job.status.is_terminal() {
        return Err(StoreError::AlreadyTerminal(job.status));
    }
    Ok(())
}

fn remaining_estimate(job: &Job) -> Option<u64> {
    if job.status.is_terminal() {
        return None;
    }
    let left = 100u64.saturating_sub(u64::from(job.progress));
    Some(job.estimated_duration_secs * left / 100)
}

fn apply_progress(job: &mut Job, update: &ProgressUpdate) {
    if let Some(total) = update.total_documents.filter(|t| *t > 0) {
        job.total_documents = total;
    }
    if let Some(processed) = update.processed_documents {
        job.processed_documents = processed.min(job.total_documents);
    }
    if let Some(progress) = update.progress {
        job.progress = progress.min(100);
    } else if update.processed_documents.is_some() && job.total_documents > 0 {
        let percent = u64::from(job.processed_documents) * 100 / u64::from(job.total_documents);
        job.progress = percent.min(100) as u8;
    }
    if let Some(step) = &update.step {
        job.current_step = Some(step.clone());
    }
    if let Some(execution_id) = &update.execution_id {
        job.execution_id = Some(execution_id.clone());
    }
}

pub struct JobTracker {
    state: RwLock<TrackerState>,
    revision: AtomicU64,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Apply `f` to a job under the write lock and append one history entry.
    ///
    /// When `f` fails the job is left exactly as it was.
    async fn mutate<F>(&self, job_id: EntityId, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<Note, StoreError>,
    {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("Job", job_id))?;

        let mut job = stored.clone();
        let note = f(&mut job)?;
        let now = Utc::now();
        job.updated_at = now;
        job.estimated_remaining_secs = remaining_estimate(&job);
        job.history.push(JobHistoryEntry {
            timestamp: now,
            status: job.status,
            step: job.current_step.clone(),
            message: note.message,
            progress: job.progress,
            error: note.error,
        });
        *stored = job.clone();
        drop(state);

        self.touch();
        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    pub async fn create_job(&self, input: NewJob) -> Result<Job, StoreError> {
        if input.deal_name.trim().is_empty() {
            return Err(StoreError::Invalid("deal_name must not be empty".into()));
        }
        if input.file_paths.is_empty() {
            return Err(StoreError::Invalid("file_paths must not be empty".into()));
        }

        let now = Utc::now();
        let estimate = estimate_total_secs(input.file_paths.iter().map(String::as_str));
        let job = Job {
            id: new_id(),
            deal_name: input.deal_name.trim().to_string(),
            trigger_type: input.trigger_type,
            workflow_type: input.workflow_type,
            priority: input.priority,
            total_documents: input.file_paths.len() as u32,
            file_paths: input.file_paths,
            status: JobStatus::Pending,
            progress: 0,
            current_step: Some("Created".into()),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            estimated_duration_secs: estimate,
            estimated_remaining_secs: Some(estimate),
            processed_documents: 0,
            queue_position: None,
            retry_count: 0,
            max_retries: input.max_retries,
            execution_id: None,
            error_message: None,
            history: vec![JobHistoryEntry {
                timestamp: now,
                status: JobStatus::Pending,
                step: Some("Created".into()),
                message: "Job created".into(),
                progress: 0,
                error: None,
            }],
            metadata: input
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            results: None,
        };

        self.state.write().await.jobs.insert(job.id, job.clone());
        self.touch();

        tracing::info!(
            job_id = %job.id,
            deal_name = %job.deal_name,
            documents = job.total_documents,
            "Job created",
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: EntityId) -> Option<Job> {
        self.state.read().await.jobs.get(&job_id).cloned()
    }

    /// Filtered, sorted, paged listing. `limit` is clamped to 100.
    pub async fn query_jobs(&self, query: &JobQuery) -> JobPage {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = query.offset.unwrap_or(0);

        let state = self.state.read().await;
        let mut matched: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .filter(|j| query.deal_name.as_deref().map_or(true, |d| j.deal_name == d))
            .filter(|j| query.trigger_type.map_or(true, |t| j.trigger_type == t))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match query.sort_by {
                JobSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                JobSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                JobSortField::Progress => a.progress.cmp(&b.progress),
                JobSortField::Status => a.status.as_str().cmp(b.status.as_str()),
            }
            // UUIDv7 ids keep ties stable in creation order.
            .then_with(|| a.id.cmp(&b.id));
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        JobPage {
            total: matched.len(),
            items: matched.into_iter().skip(offset).take(limit).cloned().collect(),
            limit,
            offset,
        }
    }

    /// Jobs interrupted by a shutdown, oldest first.
    pub async fn interrupted_jobs(&self) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Processing))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    // -----------------------------------------------------------------------
    // Dispatch lifecycle
    // -----------------------------------------------------------------------

    /// Accepted by the dispatcher. Idempotent for already-queued jobs.
    pub async fn mark_queued(&self, job_id: EntityId, position: Option<usize>) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            ensure_active(job)?;
            let requeue = job.status == JobStatus::Queued;
            transition(job, JobStatus::Queued)?;
            job.queue_position = position;
            job.current_step = Some("Queued for dispatch".into());
            Ok(Note::info(if requeue { "Job re-queued" } else { "Job queued" }))
        })
        .await
    }

    /// A worker picked the job up. Repeated attempts keep it processing.
    pub async fn mark_processing(&self, job_id: EntityId, attempt: u32) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            transition(job, JobStatus::Processing)?;
            job.queue_position = None;
            job.started_at.get_or_insert_with(Utc::now);
            job.current_step = Some("Dispatching to workflow engine".into());
            Ok(Note::info(format!("Dispatch attempt {attempt}")))
        })
        .await
    }

    /// The engine accepted the payload.
    pub async fn record_dispatched(&self, job_id: EntityId, execution_id: Option<String>) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            ensure_active(job)?;
            if execution_id.is_some() {
                job.execution_id = execution_id;
            }
            job.current_step = Some("Awaiting results".into());
            let message = match &job.execution_id {
                Some(id) => format!("Dispatched (execution {id})"),
                None => "Dispatched".to_string(),
            };
            Ok(Note::info(message))
        })
        .await
    }

    /// Record one failed dispatch attempt, consuming one unit of retry budget.
    /// The job fails once `retry_count` reaches `max_retries`.
    pub async fn record_attempt_failure(
        &self,
        job_id: EntityId,
        error: &str,
    ) -> Result<(Job, AttemptOutcome), StoreError> {
        let mut outcome = AttemptOutcome::Exhausted;
        let job = self
            .mutate(job_id, |job| {
                ensure_active(job)?;
                job.retry_count = (job.retry_count + 1).min(job.max_retries);
                if job.retry_count >= job.max_retries {
                    transition(job, JobStatus::Failed)?;
                    job.completed_at = Some(Utc::now());
                    job.error_message = Some(error.to_string());
                    job.current_step = Some("Dispatch failed".into());
                    outcome = AttemptOutcome::Exhausted;
                    Ok(Note::error(
                        format!("Dispatch failed after {} attempt(s)", job.retry_count),
                        error,
                    ))
                } else {
                    job.current_step = Some("Retrying dispatch".into());
                    outcome = AttemptOutcome::WillRetry {
                        attempt: job.retry_count,
                    };
                    Ok(Note::error(
                        format!("Dispatch attempt failed ({}/{})", job.retry_count, job.max_retries),
                        error,
                    ))
                }
            })
            .await?;
        Ok((job, outcome))
    }

    pub async fn update_progress(&self, job_id: EntityId, update: ProgressUpdate) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            ensure_active(job)?;
            if job.status == JobStatus::Queued {
                transition(job, JobStatus::Processing)?;
                job.started_at.get_or_insert_with(Utc::now);
            }
            apply_progress(job, &update);
            let message = update
                .message
                .clone()
                .unwrap_or_else(|| format!("Progress {}%", job.progress));
            Ok(Note::info(message))
        })
        .await
    }

    pub async fn complete_job(&self, job_id: EntityId, results: ProcessingResults) -> Result<Job, StoreError> {
        let job = self
            .mutate(job_id, |job| {
                Self::finish_completed(job, results)?;
                Ok(Note::info("Job completed"))
            })
            .await?;
        self.observe_throughput(&job).await;
        Ok(job)
    }

    pub async fn fail_job(&self, job_id: EntityId, error: &str) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            Self::finish_failed(job, error)?;
            Ok(Note::error("Job failed", error))
        })
        .await
    }

    fn finish_completed(job: &mut Job, results: ProcessingResults) -> Result<(), StoreError> {
        if job.status == JobStatus::Queued {
            transition(job, JobStatus::Processing)?;
        }
        transition(job, JobStatus::Completed)?;
        let now = Utc::now();
        job.started_at.get_or_insert(now);
        job.completed_at = Some(now);
        job.progress = 100;
        job.processed_documents = results.documents_processed.min(job.total_documents);
        job.current_step = Some("Completed".into());
        job.error_message = None;
        job.results = Some(results);
        Ok(())
    }

    fn finish_failed(job: &mut Job, error: &str) -> Result<(), StoreError> {
        transition(job, JobStatus::Failed)?;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(error.to_string());
        job.current_step = Some("Failed".into());
        Ok(())
    }

    async fn observe_throughput(&self, job: &Job) {
        let (Some(started), Some(completed)) = (job.started_at, job.completed_at) else {
            return;
        };
        let secs = ((completed - started).num_milliseconds() as f64 / 1000.0).max(1.0);
        let sample = 100.0 / secs;
        let mut state = self.state.write().await;
        state.throughput_ewma = Some(match state.throughput_ewma {
            Some(prev) => THROUGHPUT_ALPHA * sample + (1.0 - THROUGHPUT_ALPHA) * prev,
            None => sample,
        });
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    /// Merge a result callback into the job.
    ///
    /// Callbacks for cancelled jobs, duplicates of the current terminal
    /// status, and callbacks that would move a finished job are recorded
    /// in history and otherwise ignored.
    pub async fn apply_callback(&self, payload: &WebhookResultPayload) -> Result<CallbackOutcome, StoreError> {
        let mut ignored: Option<String> = None;
        let job = self
            .mutate(payload.job_id, |job| {
                if let Some(reason) = Self::callback_conflict(job, payload.status) {
                    ignored = Some(reason.clone());
                    return Ok(Note::info(format!("Callback ignored: {reason}")));
                }

                let update = ProgressUpdate {
                    progress: payload.progress,
                    step: payload.current_step.clone(),
                    processed_documents: Some(payload.processed_documents),
                    total_documents: Some(payload.total_documents),
                    execution_id: payload.execution_id.clone(),
                    message: None,
                };

                match payload.status {
                    ResultStatus::Processing => {
                        if job.status == JobStatus::Queued {
                            transition(job, JobStatus::Processing)?;
                        }
                        job.started_at.get_or_insert(payload.started_at.unwrap_or_else(Utc::now));
                        apply_progress(job, &update);
                        Ok(Note::info(format!(
                            "Progress {}% ({}/{} documents)",
                            job.progress, job.processed_documents, job.total_documents
                        )))
                    }
                    ResultStatus::Completed => {
                        apply_progress(job, &update);
                        if let Some(started) = payload.started_at {
                            job.started_at.get_or_insert(started);
                        }
                        Self::finish_completed(job, results_from(payload))?;
                        if let Some(completed) = payload.completed_at {
                            job.completed_at = Some(completed);
                        }
                        Ok(Note::info(format!(
                            "Completed: {}/{} documents, average confidence {:.2}",
                            job.processed_documents, job.total_documents, payload.average_confidence
                        )))
                    }
                    ResultStatus::Failed => {
                        apply_progress(job, &update);
                        let error = failure_message(payload);
                        Self::finish_failed(job, &error)?;
                        job.results = Some(results_from(payload));
                        Ok(Note::error("Workflow reported failure", error))
                    }
                }
            })
            .await?;

        match ignored {
            Some(reason) => {
                tracing::info!(job_id = %job.id, %reason, "Callback ignored");
                Ok(CallbackOutcome::Ignored { job, reason })
            }
            None => {
                if job.status == JobStatus::Completed {
                    self.observe_throughput(&job).await;
                }
                Ok(CallbackOutcome::Applied(job))
            }
        }
    }

    /// Merge an error callback. Retryable errors are only recorded; the
    /// job stays where it is so the engine's own retry can still report.
    pub async fn apply_error_callback(&self, payload: &ErrorHandlingPayload) -> Result<CallbackOutcome, StoreError> {
        let mut ignored: Option<String> = None;
        let message = format!("{}: {}", payload.error_type, payload.error_message);
        let job = self
            .mutate(payload.job_id, |job| {
                if let Some(reason) = Self::callback_conflict(job, ResultStatus::Failed) {
                    ignored = Some(reason.clone());
                    return Ok(Note::error(format!("Error callback ignored: {reason}"), message.clone()));
                }
                if let Some(execution_id) = &payload.execution_id {
                    job.execution_id = Some(execution_id.clone());
                }
                if payload.retryable {
                    return Ok(Note::error("Workflow reported a retryable error", message.clone()));
                }
                Self::finish_failed(job, &message)?;
                Ok(Note::error("Workflow reported an error", message.clone()))
            })
            .await?;

        Ok(match ignored {
            Some(reason) => CallbackOutcome::Ignored { job, reason },
            None => CallbackOutcome::Applied(job),
        })
    }

    /// Why a callback with `incoming` status must not change `job`, if at all.
    fn callback_conflict(job: &Job, incoming: ResultStatus) -> Option<String> {
        let incoming_status = match incoming {
            ResultStatus::Processing => JobStatus::Processing,
            ResultStatus::Completed => JobStatus::Completed,
            ResultStatus::Failed => JobStatus::Failed,
        };
        match job.status {
            JobStatus::Cancelled => Some("job was cancelled".into()),
            current if current == incoming_status && current.is_terminal() => {
                Some(format!("duplicate {current} callback"))
            }
            current if current.is_terminal() => {
                Some(format!("job already {current}, got {incoming_status}"))
            }
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Re-queue a failed job. Fails without touching the counter when the
    /// job is not failed or its retry budget is spent.
    pub async fn retry_job(&self, job_id: EntityId) -> Result<Job, StoreError> {
        let job = self
            .mutate(job_id, |job| {
                if job.status != JobStatus::Failed {
                    return Err(StoreError::InvalidTransition {
                        from: job.status,
                        to: JobStatus::Queued,
                    });
                }
                if job.retry_count >= job.max_retries {
                    return Err(StoreError::RetryLimitReached {
                        retry_count: job.retry_count,
                        max_retries: job.max_retries,
                    });
                }
                transition(job, JobStatus::Queued)?;
                job.retry_count += 1;
                job.progress = 0;
                job.processed_documents = 0;
                job.completed_at = None;
                job.error_message = None;
                job.results = None;
                job.current_step = Some("Queued for retry".into());
                Ok(Note::info(format!(
                    "Retry requested ({}/{})",
                    job.retry_count, job.max_retries
                )))
            })
            .await?;

        tracing::info!(job_id = %job.id, retry_count = job.retry_count, "Job retried");
        Ok(job)
    }

    pub async fn cancel_job(&self, job_id: EntityId, reason: Option<&str>) -> Result<Job, StoreError> {
        let job = self
            .mutate(job_id, |job| {
                ensure_active(job)?;
                transition(job, JobStatus::Cancelled)?;
                job.completed_at = Some(Utc::now());
                job.queue_position = None;
                job.current_step = Some("Cancelled".into());
                Ok(Note::info(match reason {
                    Some(r) => format!("Job cancelled: {r}"),
                    None => "Job cancelled".to_string(),
                }))
            })
            .await?;

        tracing::info!(job_id = %job.id, "Job cancelled");
        Ok(job)
    }

    /// Remove terminal jobs last updated more than `age_hours` ago.
    pub async fn cleanup_old_jobs(&self, age_hours: i64) -> usize {
        let cutoff = Utc::now() - Duration::hours(age_hours);
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, j| !(j.status.is_terminal() && j.updated_at < cutoff));
        let removed = before - state.jobs.len();
        drop(state);

        if removed > 0 {
            self.touch();
            tracing::info!(removed, age_hours, "Cleaned up old jobs");
        }
        removed
    }

    pub async fn job_summary(&self) -> JobSummary {
        let state = self.state.read().await;

        let mut by_status: BTreeMap<String, usize> = JobStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut active_progress = Vec::new();
        let mut activity = Vec::new();

        for job in state.jobs.values() {
            *by_status.entry(job.status.as_str().to_string()).or_default() += 1;
            if job.is_active() {
                active_progress.push(f64::from(job.progress));
            }
            activity.extend(job.history.iter().map(|entry| ActivityEntry {
                job_id: job.id,
                deal_name: job.deal_name.clone(),
                entry: entry.clone(),
            }));
        }

        activity.sort_by(|a, b| b.entry.timestamp.cmp(&a.entry.timestamp));
        activity.truncate(RECENT_ACTIVITY_LIMIT);

        let average_active_progress = if active_progress.is_empty() {
            0.0
        } else {
            active_progress.iter().sum::<f64>() / active_progress.len() as f64
        };

        JobSummary {
            total: state.jobs.len(),
            by_status,
            average_active_progress,
            throughput_ewma: state.throughput_ewma,
            recent_activity: activity,
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot support
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub async fn restore(&self, jobs: Vec<Job>) {
        let mut state = self.state.write().await;
        state.jobs = jobs.into_iter().map(|j| (j.id, j)).collect();
        drop(state);
        self.touch();
    }
}

fn results_from(payload: &WebhookResultPayload) -> ProcessingResults {
    ProcessingResults {
        documents_processed: payload.processed_documents,
        templates_updated: payload.templates_updated.clone(),
        average_confidence: payload.average_confidence,
        processing_time_ms: payload.processing_time_ms,
        document_results: payload.document_results.clone(),
        errors: payload.errors.clone(),
    }
}

fn failure_message(payload: &WebhookResultPayload) -> String {
    payload
        .error_message
        .clone()
        .or_else(|| (!payload.errors.is_empty()).then(|| payload.errors.join("; ")))
        .unwrap_or_else(|| "Workflow reported failure".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use docrelay_core::scheduling::{Priority, TriggerType};
    use docrelay_core::workflow::WorkflowType;

    fn new_job(max_retries: u32) -> NewJob {
        NewJob {
            deal_name: "Acme Tower".into(),
            file_paths: vec!["/deals/acme/rent_roll.pdf".into(), "/deals/acme/t12.xlsx".into()],
            trigger_type: TriggerType::Manual,
            workflow_type: WorkflowType::DocumentAnalysis,
            priority: Priority::Normal,
            max_retries,
            metadata: None,
        }
    }

    fn result(job: &Job, status: ResultStatus) -> WebhookResultPayload {
        WebhookResultPayload {
            job_id: job.id,
            deal_name: job.deal_name.clone(),
            workflow_type: WorkflowType::DocumentAnalysis,
            status,
            processed_documents: 2,
            total_documents: 2,
            average_confidence: 0.9,
            processing_time_ms: 1200,
            templates_updated: vec!["model.xlsx".into()],
            timestamp: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_id: Some("77".into()),
            progress: None,
            current_step: None,
            error_message: None,
            errors: Vec::new(),
            document_results: Vec::new(),
        }
    }

    async fn processing_job(tracker: &JobTracker, max_retries: u32) -> Job {
        let job = tracker.create_job(new_job(max_retries)).await.unwrap();
        tracker.mark_queued(job.id, Some(1)).await.unwrap();
        tracker.mark_processing(job.id, 1).await.unwrap()
    }

    async fn failed_job(tracker: &JobTracker, retry_count: u32, max_retries: u32) -> Job {
        let job = processing_job(tracker, max_retries).await;
        let mut state = tracker.state.write().await;
        let stored = state.jobs.get_mut(&job.id).unwrap();
        stored.status = JobStatus::Failed;
        stored.retry_count = retry_count;
        stored.clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_job_starts_pending_with_estimate() {
        let tracker = JobTracker::new();
        let job = tracker.create_job(new_job(3)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_documents, 2);
        assert_eq!(job.estimated_duration_secs, 45 + 60);
        assert_eq!(job.history.len(), 1);
    }

    #[tokio::test]
    async fn create_job_rejects_empty_paths() {
        let tracker = JobTracker::new();
        let mut input = new_job(3);
        input.file_paths.clear();
        assert_matches!(tracker.create_job(input).await, Err(StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn every_mutation_appends_one_history_entry() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        assert_eq!(job.history.len(), 3);

        let job = tracker.record_dispatched(job.id, Some("42".into())).await.unwrap();
        assert_eq!(job.history.len(), 4);
        assert_eq!(job.execution_id.as_deref(), Some("42"));

        let job = tracker
            .update_progress(
                job.id,
                ProgressUpdate {
                    processed_documents: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(job.history.len(), 5);
        assert_eq!(job.progress, 50);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_job_untouched() {
        let tracker = JobTracker::new();
        let job = tracker.create_job(new_job(3)).await.unwrap();
        let err = tracker.complete_job(job.id, ProcessingResults::default()).await.unwrap_err();
        assert_matches!(err, StoreError::InvalidTransition { from: JobStatus::Pending, .. });
        assert_eq!(tracker.get_job(job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn processed_never_exceeds_total() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let job = tracker
            .update_progress(
                job.id,
                ProgressUpdate {
                    processed_documents: Some(9),
                    progress: Some(250),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(job.processed_documents, 2);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn progress_from_large_counts_does_not_overflow() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let job = tracker
            .update_progress(
                job.id,
                ProgressUpdate {
                    total_documents: Some(u32::MAX),
                    processed_documents: Some(u32::MAX / 2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(job.progress, 49);

        let job = tracker
            .update_progress(
                job.id,
                ProgressUpdate {
                    processed_documents: Some(u32::MAX),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(job.processed_documents, u32::MAX);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let tracker = JobTracker::new();
        assert_matches!(
            tracker.mark_queued(new_id(), None).await,
            Err(StoreError::NotFound { entity: "Job", .. })
        );
    }

    // -----------------------------------------------------------------------
    // Dispatch failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn attempt_failures_consume_budget_then_fail() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;

        let (_, outcome) = tracker.record_attempt_failure(job.id, "timeout").await.unwrap();
        assert_eq!(outcome, AttemptOutcome::WillRetry { attempt: 1 });
        let (_, outcome) = tracker.record_attempt_failure(job.id, "timeout").await.unwrap();
        assert_eq!(outcome, AttemptOutcome::WillRetry { attempt: 2 });
        let (job, outcome) = tracker.record_attempt_failure(job.id, "timeout").await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Exhausted);

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.history.iter().filter(|h| h.error.is_some()).count(), 3);
        assert_matches!(tracker.retry_job(job.id).await, Err(StoreError::RetryLimitReached { .. }));
    }

    // -----------------------------------------------------------------------
    // Retry and cancel
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn retry_below_ceiling_requeues_then_refuses() {
        let tracker = JobTracker::new();
        let job = failed_job(&tracker, 2, 3).await;

        let retried = tracker.retry_job(job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.retry_count, 3);

        tracker.mark_processing(job.id, 4).await.unwrap();
        tracker.fail_job(job.id, "still broken").await.unwrap();
        let err = tracker.retry_job(job.id).await.unwrap_err();
        assert_matches!(err, StoreError::RetryLimitReached { retry_count: 3, max_retries: 3 });
        assert_eq!(tracker.get_job(job.id).await.unwrap().retry_count, 3);
    }

    #[tokio::test]
    async fn retry_requires_failed_status() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        assert_matches!(
            tracker.retry_job(job.id).await,
            Err(StoreError::InvalidTransition { from: JobStatus::Processing, to: JobStatus::Queued })
        );
    }

    #[tokio::test]
    async fn cancel_terminal_job_fails() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let cancelled = tracker.cancel_job(job.id, Some("operator")).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        assert_matches!(
            tracker.cancel_job(job.id, None).await,
            Err(StoreError::AlreadyTerminal(JobStatus::Cancelled))
        );
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn completion_callback_merges_results() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;

        let outcome = tracker.apply_callback(&result(&job, ResultStatus::Completed)).await.unwrap();
        let job = assert_matches!(outcome, CallbackOutcome::Applied(job) => job);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.execution_id.as_deref(), Some("77"));
        assert_eq!(job.results.unwrap().templates_updated, vec!["model.xlsx".to_string()]);
        assert!(tracker.job_summary().await.throughput_ewma.is_some());
    }

    #[tokio::test]
    async fn duplicate_terminal_callback_is_ignored() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        tracker.apply_callback(&result(&job, ResultStatus::Completed)).await.unwrap();

        let outcome = tracker.apply_callback(&result(&job, ResultStatus::Completed)).await.unwrap();
        assert_matches!(outcome, CallbackOutcome::Ignored { .. });
        assert_eq!(outcome.job().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancelled_job_records_but_ignores_callbacks() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let cancelled = tracker.cancel_job(job.id, None).await.unwrap();

        let outcome = tracker.apply_callback(&result(&job, ResultStatus::Completed)).await.unwrap();
        let after = outcome.job();
        assert_eq!(after.status, JobStatus::Cancelled);
        assert_eq!(after.history.len(), cancelled.history.len() + 1);
        assert!(after.results.is_none());
    }

    #[tokio::test]
    async fn failure_callback_fails_job() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let mut payload = result(&job, ResultStatus::Failed);
        payload.error_message = Some("OCR crashed".into());

        let outcome = tracker.apply_callback(&payload).await.unwrap();
        assert_eq!(outcome.job().status, JobStatus::Failed);
        assert_eq!(outcome.job().error_message.as_deref(), Some("OCR crashed"));
    }

    #[tokio::test]
    async fn retryable_error_callback_only_records() {
        let tracker = JobTracker::new();
        let job = processing_job(&tracker, 3).await;
        let payload = ErrorHandlingPayload {
            job_id: job.id,
            deal_name: job.deal_name.clone(),
            error_type: "rate_limited".into(),
            error_message: "slow down".into(),
            timestamp: Utc::now(),
            retryable: true,
            execution_id: None,
            context: serde_json::json!({}),
        };
        let outcome = tracker.apply_error_callback(&payload).await.unwrap();
        assert_eq!(outcome.job().status, JobStatus::Processing);
        assert!(outcome.job().history.last().unwrap().error.is_some());

        let payload = ErrorHandlingPayload {
            retryable: false,
            ..payload
        };
        let outcome = tracker.apply_error_callback(&payload).await.unwrap();
        assert_eq!(outcome.job().status, JobStatus::Failed);
    }

    // -----------------------------------------------------------------------
    // Queries and maintenance
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn query_filters_sorts_and_clamps() {
        let tracker = JobTracker::new();
        let first = tracker.create_job(new_job(3)).await.unwrap();
        let second = tracker.create_job(new_job(3)).await.unwrap();
        let mut other = new_job(3);
        other.deal_name = "Globex".into();
        tracker.create_job(other).await.unwrap();

        let page = tracker
            .query_jobs(&JobQuery {
                deal_name: Some("Acme Tower".into()),
                limit: Some(1000),
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .await;
        assert_eq!(page.total, 2);
        assert_eq!(page.limit, MAX_LIMIT);
        assert_eq!(page.items[0].id, first.id);
        assert_eq!(page.items[1].id, second.id);

        let page = tracker.query_jobs(&JobQuery::default()).await;
        assert_eq!(page.items.first().unwrap().deal_name, "Globex");
    }

    #[tokio::test]
    async fn summary_counts_every_status() {
        let tracker = JobTracker::new();
        processing_job(&tracker, 3).await;
        tracker.create_job(new_job(3)).await.unwrap();

        let summary = tracker.job_summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status.len(), JobStatus::ALL.len());
        assert_eq!(summary.by_status["processing"], 1);
        assert_eq!(summary.by_status["pending"], 1);
        assert_eq!(summary.by_status["failed"], 0);
        assert!(!summary.recent_activity.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_jobs() {
        let tracker = JobTracker::new();
        let done = processing_job(&tracker, 3).await;
        tracker.fail_job(done.id, "boom").await.unwrap();
        tracker.create_job(new_job(3)).await.unwrap();

        assert_eq!(tracker.cleanup_old_jobs(1).await, 0);
        assert_eq!(tracker.cleanup_old_jobs(-1).await, 1);
        assert!(tracker.get_job(done.id).await.is_none());
    }
}
