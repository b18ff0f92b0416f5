//! Concurrency-bounded dispatch of accepted jobs to the workflow engine.
//!
//! A fixed pool of `max_concurrent_jobs` worker tasks drains a priority
//! backlog (FIFO within a priority band), so at most that many outbound
//! calls are ever in flight; extra work waits in the backlog. Every
//! accepted job is tracked as an [`OutboundRequest`] until the engine
//! acknowledges it through a callback, its retries run out, or it is
//! cancelled. A separate health monitor flips a degraded flag without
//! touching requests that are already accepted.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docrelay_core::env::{bool_var, parse_var};
use docrelay_core::error::CoreError;
use docrelay_core::payloads::{BatchProcessingPayload, DocumentWebhookPayload};
use docrelay_core::scheduling::{JobStatus, Priority};
use docrelay_core::types::{new_id, EntityId, Timestamp};
use docrelay_core::workflow::WorkflowType;
use docrelay_store::models::job::{AttemptOutcome, Job};
use docrelay_store::models::queue_item::{HistoryKind, WorkflowSignal};
use docrelay_store::snapshot::Persister;
use docrelay_store::StoreError;
use docrelay_webhook::engine::{DispatchReceipt, RemoteExecutionStatus};
use docrelay_webhook::{WebhookError, WorkflowEngine};

use crate::state::Registries;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Dispatcher is not running")]
    NotRunning,

    #[error("Job {0} is not tracked")]
    UnknownJob(EntityId),

    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Worker count, and so the ceiling on concurrent outbound calls.
    pub max_concurrent_jobs: usize,
    /// Retry budget given to every job the dispatcher creates.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub batch_enabled: bool,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub health_check_interval_secs: u64,
    /// How often the queue feeder looks for free capacity.
    pub poll_interval_ms: u64,
    /// Sent to the engine as `timeoutSeconds`.
    pub job_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            batch_enabled: false,
            batch_size: 10,
            batch_timeout_ms: 2000,
            health_check_interval_secs: 30,
            poll_interval_ms: 500,
            job_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    /// Load dispatcher configuration from environment variables.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `MAX_CONCURRENT_JOBS`        | `4`     |
    /// | `MAX_RETRIES`                | `3`     |
    /// | `RETRY_DELAY_MS`             | `1000`  |
    /// | `BATCH_ENABLED`              | `false` |
    /// | `BATCH_SIZE`                 | `10`    |
    /// | `BATCH_TIMEOUT_MS`           | `2000`  |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30`    |
    /// | `QUEUE_POLL_INTERVAL_MS`     | `500`   |
    pub fn from_env(job_timeout_secs: u64) -> Result<Self, CoreError> {
        let d = Self::default();
        let config = Self {
            max_concurrent_jobs: parse_var("MAX_CONCURRENT_JOBS", d.max_concurrent_jobs)?,
            max_retries: parse_var("MAX_RETRIES", d.max_retries)?,
            retry_delay_ms: parse_var("RETRY_DELAY_MS", d.retry_delay_ms)?,
            batch_enabled: bool_var("BATCH_ENABLED", d.batch_enabled)?,
            batch_size: parse_var("BATCH_SIZE", d.batch_size)?,
            batch_timeout_ms: parse_var("BATCH_TIMEOUT_MS", d.batch_timeout_ms)?,
            health_check_interval_secs: parse_var(
                "HEALTH_CHECK_INTERVAL_SECS",
                d.health_check_interval_secs,
            )?,
            poll_interval_ms: parse_var("QUEUE_POLL_INTERVAL_MS", d.poll_interval_ms)?,
            job_timeout_secs,
        };
        config
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_concurrent_jobs == 0 {
            return Err(DispatchError::InvalidConfig("max_concurrent_jobs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(DispatchError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.health_check_interval_secs == 0 || self.poll_interval_ms == 0 {
            return Err(DispatchError::InvalidConfig("intervals must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Outbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    InFlight,
    Retrying,
    AwaitingCallback,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    /// Counts against `max_concurrent_jobs`.
    fn occupies_slot(&self) -> bool {
        matches!(self, Self::Queued | Self::InFlight | Self::Retrying)
    }
}

/// One accepted job on its way to (or waiting on) the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRequest {
    pub id: EntityId,
    pub job_id: EntityId,
    pub workflow_type: WorkflowType,
    pub priority: Priority,
    pub status: RequestStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub execution_id: Option<String>,
    pub payload: DocumentWebhookPayload,
    #[serde(skip)]
    cancel: CancellationToken,
}

/// Build the dispatch payload for a tracked job.
pub fn build_payload(job: &Job, timeout_seconds: u64) -> DocumentWebhookPayload {
    DocumentWebhookPayload {
        deal_name: job.deal_name.clone(),
        file_paths: job.file_paths.clone(),
        trigger_type: job.trigger_type,
        workflow_type: job.workflow_type,
        job_id: job.id,
        priority: job.priority,
        timestamp: Utc::now(),
        retry_count: job.retry_count,
        max_retries: job.max_retries,
        timeout_seconds,
        metadata: job.metadata.clone(),
    }
}

// ---------------------------------------------------------------------------
// Backlog
// ---------------------------------------------------------------------------

/// Higher priority first, then submission order.
#[derive(Debug, PartialEq, Eq)]
struct BacklogEntry {
    priority: Priority,
    seq: u64,
    request_id: EntityId,
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Backlog {
    heap: BinaryHeap<BacklogEntry>,
    next_seq: u64,
}

impl Backlog {
    fn entry_for(&mut self, request: &OutboundRequest) -> BacklogEntry {
        self.next_seq += 1;
        BacklogEntry {
            priority: request.priority,
            seq: self.next_seq,
            request_id: request.id,
        }
    }

    /// 1-based position `entry` would take.
    fn position_of(&self, entry: &BacklogEntry) -> usize {
        self.heap.iter().filter(|e| *e > entry).count() + 1
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Outcome of the latest engine health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub checked_at: Timestamp,
    pub healthy: bool,
    pub engine_version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dispatched: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    acknowledged: AtomicU64,
    cancelled: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Response for `GET /api/v1/dispatcher/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub running: bool,
    pub degraded: bool,
    pub backlog_size: usize,
    pub active_requests: usize,
    pub in_flight: usize,
    pub awaiting_callback: usize,
    pub config: DispatcherConfig,
    pub total_accepted: u64,
    pub total_dispatched: u64,
    pub total_retried: u64,
    pub total_failed: u64,
    pub total_acknowledged: u64,
    pub total_cancelled: u64,
    pub last_health_check: Option<HealthSnapshot>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct Runtime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A request picked up by a worker for one send attempt.
struct Attempt {
    request_id: EntityId,
    job_id: EntityId,
    payload: DocumentWebhookPayload,
    cancel: CancellationToken,
}

enum Transmit {
    Delivered(DispatchReceipt),
    Failed(WebhookError),
    Cancelled,
}

pub struct Dispatcher {
    engine: Arc<dyn WorkflowEngine>,
    registries: Registries,
    persister: Option<Arc<Persister>>,
    config: RwLock<DispatcherConfig>,
    backlog: Mutex<Backlog>,
    work_ready: Notify,
    active: RwLock<HashMap<EntityId, OutboundRequest>>,
    running: AtomicBool,
    /// Workers spawned by the current run.
    pool_size: AtomicUsize,
    degraded: AtomicBool,
    last_health: RwLock<Option<HealthSnapshot>>,
    runtime: Mutex<Option<Runtime>>,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        registries: Registries,
        config: DispatcherConfig,
        persister: Option<Arc<Persister>>,
    ) -> Self {
        Self {
            engine,
            registries,
            persister,
            config: RwLock::new(config),
            backlog: Mutex::new(Backlog::default()),
            work_ready: Notify::new(),
            active: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            pool_size: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            last_health: RwLock::new(None),
            runtime: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the worker pool and the health monitor.
    pub async fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyRunning);
        }
        let config = self.config.read().await.clone();
        self.pool_size.store(config.max_concurrent_jobs, Ordering::Release);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(config.max_concurrent_jobs + 1);

        for worker in 0..config.max_concurrent_jobs {
            let this = Arc::clone(self);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move { this.worker_loop(worker, token).await }));
        }
        let this = Arc::clone(self);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { this.health_monitor(token).await }));

        *self.runtime.lock().await = Some(Runtime { cancel, tasks });
        tracing::info!(
            workers = config.max_concurrent_jobs,
            batch_enabled = config.batch_enabled,
            "Dispatcher started",
        );
        Ok(())
    }

    /// Stop pulling work, let in-flight sends finish, then persist state.
    /// Stopping a stopped dispatcher is a no-op.
    pub async fn stop(&self) -> Result<(), DispatchError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.cancel.cancel();
            for task in runtime.tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Dispatcher task panicked");
                }
            }
        }

        // Attempts abandoned mid-retry are picked up again by
        // `resubmit_interrupted`; backlog entries survive as they are.
        self.active
            .write()
            .await
            .retain(|_, r| matches!(r.status, RequestStatus::Queued | RequestStatus::AwaitingCallback));

        if let Some(persister) = &self.persister {
            persister.save(self.registries.stores()).await?;
        }
        tracing::info!("Dispatcher stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub async fn get_config(&self) -> DispatcherConfig {
        self.config.read().await.clone()
    }

    /// Retry, batching and interval settings apply immediately; a new
    /// worker count applies on the next start.
    pub async fn update_config(&self, config: DispatcherConfig) -> Result<(), DispatchError> {
        config.validate()?;
        let mut current = self.config.write().await;
        if current.max_concurrent_jobs != config.max_concurrent_jobs && self.is_running() {
            tracing::info!(
                from = current.max_concurrent_jobs,
                to = config.max_concurrent_jobs,
                "Worker count change takes effect on restart",
            );
        }
        *current = config;
        tracing::info!("Dispatcher configuration updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Accept a job for dispatch.
    ///
    /// The request's cancellation token is a child of `cancel`. Cancelling
    /// it withdraws the request but leaves the job queued or processing,
    /// so `resubmit_interrupted` picks it up again; use [`Self::cancel_job`]
    /// after cancelling the job to stop it for good. When the job already
    /// has a live request, that request is returned instead.
    pub async fn send_document_analysis_request(
        &self,
        payload: DocumentWebhookPayload,
        cancel: &CancellationToken,
    ) -> Result<OutboundRequest, DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::NotRunning);
        }
        let job = self
            .registries
            .tracker
            .get_job(payload.job_id)
            .await
            .ok_or(DispatchError::UnknownJob(payload.job_id))?;
        if job.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(job.status).into());
        }

        let request = {
            let mut active = self.active.write().await;
            if let Some(existing) = active
                .values()
                .find(|r| r.job_id == job.id && !is_settled(r.status))
            {
                return Ok(existing.clone());
            }
            let request = OutboundRequest {
                id: new_id(),
                job_id: job.id,
                workflow_type: payload.workflow_type,
                priority: payload.priority,
                status: RequestStatus::Queued,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                retry_count: job.retry_count,
                max_retries: job.max_retries,
                last_error: None,
                execution_id: None,
                payload,
                cancel: cancel.child_token(),
            };
            active.insert(request.id, request.clone());
            request
        };

        // The job must be queued before a worker can see the entry.
        let mut backlog = self.backlog.lock().await;
        let entry = backlog.entry_for(&request);
        let position = backlog.position_of(&entry);
        if job.status != JobStatus::Processing {
            if let Err(e) = self.registries.tracker.mark_queued(job.id, Some(position)).await {
                drop(backlog);
                self.active.write().await.remove(&request.id);
                return Err(e.into());
            }
        }
        backlog.heap.push(entry);
        drop(backlog);

        bump(&self.counters.accepted);
        self.work_ready.notify_one();
        tracing::info!(
            job_id = %request.job_id,
            request_id = %request.id,
            priority = request.priority.as_str(),
            position,
            "Job accepted for dispatch",
        );
        Ok(request)
    }

    /// Re-dispatch jobs a previous run left queued or processing.
    ///
    /// Processing jobs the engine already acknowledged keep waiting for
    /// their callback and are not sent twice.
    pub async fn resubmit_interrupted(&self, cancel: &CancellationToken) -> Result<usize, DispatchError> {
        let timeout = self.config.read().await.job_timeout_secs;
        let mut resubmitted = 0;
        for job in self.registries.tracker.interrupted_jobs().await {
            if self.has_live_request(job.id).await {
                continue;
            }
            if job.status == JobStatus::Processing && job.execution_id.is_some() {
                tracing::debug!(job_id = %job.id, "Job already with the engine, awaiting callback");
                continue;
            }
            match self
                .send_document_analysis_request(build_payload(&job, timeout), cancel)
                .await
            {
                Ok(_) => resubmitted += 1,
                Err(DispatchError::NotRunning) => return Err(DispatchError::NotRunning),
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Could not resubmit job"),
            }
        }
        if resubmitted > 0 {
            tracing::info!(resubmitted, "Interrupted jobs resubmitted");
        }
        Ok(resubmitted)
    }

    // -----------------------------------------------------------------------
    // Remote control
    // -----------------------------------------------------------------------

    pub async fn get_workflow_status(&self, execution_id: &str) -> Result<RemoteExecutionStatus, DispatchError> {
        Ok(self.engine.get_execution_status(execution_id).await?)
    }

    /// Stop an execution on the engine and cancel the job it belongs to.
    pub async fn cancel_workflow(&self, execution_id: &str) -> Result<Option<EntityId>, DispatchError> {
        self.engine.cancel_execution(execution_id).await?;

        let request = {
            let mut active = self.active.write().await;
            let id = active
                .values()
                .find(|r| r.execution_id.as_deref() == Some(execution_id))
                .map(|r| r.id);
            id.and_then(|id| active.remove(&id))
        };
        let Some(request) = request else {
            return Ok(None);
        };
        request.cancel.cancel();
        bump(&self.counters.cancelled);

        match self
            .registries
            .tracker
            .cancel_job(request.job_id, Some("execution stopped"))
            .await
        {
            Ok(_) | Err(StoreError::AlreadyTerminal(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.registries
            .queue
            .synchronize_state(request.job_id, WorkflowSignal::Failed)
            .await;
        Ok(Some(request.job_id))
    }

    /// Withdraw a job's request after the job itself was cancelled.
    ///
    /// Queued and awaiting requests leave the pool at once; a request in
    /// flight is cancelled through its token and settled by its worker.
    /// A known execution is stopped on the engine, best effort.
    pub async fn cancel_job(&self, job_id: EntityId) -> Option<OutboundRequest> {
        let request = {
            let mut active = self.active.write().await;
            let id = active.values().find(|r| r.job_id == job_id).map(|r| r.id)?;
            let request = active.get(&id)?.clone();
            if matches!(request.status, RequestStatus::Queued | RequestStatus::AwaitingCallback) {
                active.remove(&id);
                bump(&self.counters.cancelled);
            }
            request
        };
        request.cancel.cancel();

        if let Some(execution_id) = &request.execution_id {
            if let Err(e) = self.engine.cancel_execution(execution_id).await {
                tracing::warn!(job_id = %job_id, execution_id, error = %e, "Could not stop remote execution");
            }
        }
        Some(request)
    }

    /// A terminal callback arrived; the request leaves the pool.
    pub async fn acknowledge(&self, job_id: EntityId, success: bool) -> Option<OutboundRequest> {
        let mut request = {
            let mut active = self.active.write().await;
            let id = active.values().find(|r| r.job_id == job_id).map(|r| r.id)?;
            active.remove(&id)?
        };
        request.status = if success {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        };
        request.completed_at = Some(Utc::now());
        bump(&self.counters.acknowledged);
        tracing::debug!(job_id = %job_id, request_id = %request.id, success, "Request acknowledged");
        Some(request)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Requests in the pool, oldest first.
    pub async fn get_active_requests(&self) -> Vec<OutboundRequest> {
        let mut requests: Vec<OutboundRequest> = self.active.read().await.values().cloned().collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        requests
    }

    pub async fn get_stats(&self) -> DispatcherStats {
        let (active_requests, in_flight, awaiting_callback) = {
            let active = self.active.read().await;
            (
                active.len(),
                active
                    .values()
                    .filter(|r| matches!(r.status, RequestStatus::InFlight | RequestStatus::Retrying))
                    .count(),
                active
                    .values()
                    .filter(|r| r.status == RequestStatus::AwaitingCallback)
                    .count(),
            )
        };
        let c = &self.counters;
        DispatcherStats {
            running: self.is_running(),
            degraded: self.is_degraded(),
            backlog_size: self.backlog.lock().await.heap.len(),
            active_requests,
            in_flight,
            awaiting_callback,
            config: self.get_config().await,
            total_accepted: c.accepted.load(Ordering::Relaxed),
            total_dispatched: c.dispatched.load(Ordering::Relaxed),
            total_retried: c.retried.load(Ordering::Relaxed),
            total_failed: c.failed.load(Ordering::Relaxed),
            total_acknowledged: c.acknowledged.load(Ordering::Relaxed),
            total_cancelled: c.cancelled.load(Ordering::Relaxed),
            last_health_check: self.last_health.read().await.clone(),
        }
    }

    /// How many more jobs can be accepted before the pool is saturated.
    ///
    /// While running this is bounded by the workers actually spawned, not
    /// by a worker count that only applies on restart.
    pub async fn available_slots(&self) -> usize {
        let max = if self.is_running() {
            self.pool_size.load(Ordering::Acquire)
        } else {
            self.config.read().await.max_concurrent_jobs
        };
        let busy = self
            .active
            .read()
            .await
            .values()
            .filter(|r| r.status.occupies_slot())
            .count();
        max.saturating_sub(busy)
    }

    async fn has_live_request(&self, job_id: EntityId) -> bool {
        self.active
            .read()
            .await
            .values()
            .any(|r| r.job_id == job_id && !is_settled(r.status))
    }

    /// Probe the engine and update the degraded flag.
    pub async fn is_healthy(&self) -> bool {
        let snapshot = match self.engine.health_check().await {
            Ok(health) => HealthSnapshot {
                checked_at: Utc::now(),
                healthy: health.status != "down",
                engine_version: Some(health.version),
                error: None,
            },
            Err(e) => HealthSnapshot {
                checked_at: Utc::now(),
                healthy: false,
                engine_version: None,
                error: Some(e.to_string()),
            },
        };
        let healthy = snapshot.healthy;
        let was_degraded = self.degraded.swap(!healthy, Ordering::AcqRel);
        if was_degraded && healthy {
            tracing::info!("Workflow engine reachable again");
        } else if !was_degraded && !healthy {
            tracing::warn!(error = ?snapshot.error, "Workflow engine unhealthy, dispatcher degraded");
        }
        *self.last_health.write().await = Some(snapshot);
        healthy
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    async fn health_monitor(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config.read().await.health_check_interval();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.is_healthy().await;
                }
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        tracing::debug!(worker, "Dispatch worker started");
        while let Some(first) = self.next_request(&cancel).await {
            let (batch_enabled, batch_size, batch_timeout) = {
                let config = self.config.read().await;
                (config.batch_enabled, config.batch_size, config.batch_timeout())
            };
            let mut ids = vec![first];
            if batch_enabled && batch_size > 1 {
                self.fill_batch(&mut ids, batch_size, batch_timeout, &cancel).await;
            }
            self.deliver(ids, &cancel).await;
        }
        tracing::debug!(worker, "Dispatch worker stopped");
    }

    async fn next_request(&self, cancel: &CancellationToken) -> Option<EntityId> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(entry) = self.backlog.lock().await.heap.pop() {
                return Some(entry.request_id);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.work_ready.notified() => {}
            }
        }
    }

    /// Top up a batch until it is full or `timeout` elapses.
    async fn fill_batch(
        &self,
        ids: &mut Vec<EntityId>,
        size: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        while ids.len() < size {
            if let Some(entry) = self.backlog.lock().await.heap.pop() {
                ids.push(entry.request_id);
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                _ = self.work_ready.notified() => {}
            }
        }
    }

    /// Send `ids` (one payload, or one batch) until accepted, cancelled or
    /// out of retries.
    async fn deliver(&self, ids: Vec<EntityId>, shutdown: &CancellationToken) {
        let mut pending = ids;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = self.begin_attempt(&pending, attempt).await;
            if started.is_empty() {
                return;
            }

            let error = match self.transmit(&started).await {
                Transmit::Delivered(receipt) => {
                    for a in &started {
                        self.mark_awaiting(a, &receipt).await;
                    }
                    return;
                }
                Transmit::Cancelled => {
                    for a in &started {
                        self.withdraw(a).await;
                    }
                    return;
                }
                Transmit::Failed(e) => e,
            };

            let mut retry = Vec::new();
            for a in &started {
                if self.record_failure(a, &error).await {
                    retry.push(a.request_id);
                }
            }
            if retry.is_empty() {
                return;
            }

            let delay = self.config.read().await.retry_delay() * attempt;
            tracing::warn!(
                attempt,
                requests = retry.len(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Dispatch failed, retrying",
            );
            let watch = single_token(&started);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(requests = retry.len(), "Dispatcher stopping, pending retries abandoned");
                    return;
                }
                _ = watch.cancelled() => {
                    for a in &started {
                        self.withdraw(a).await;
                    }
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            pending = retry;
        }
    }

    /// Move each request in flight and mark its job processing.
    async fn begin_attempt(&self, ids: &[EntityId], attempt: u32) -> Vec<Attempt> {
        let tracker = &self.registries.tracker;
        let mut started = Vec::with_capacity(ids.len());

        for id in ids {
            let found = self.active.read().await.get(id).map(|r| (r.job_id, r.cancel.clone()));
            let Some((job_id, cancel)) = found else {
                continue;
            };
            if cancel.is_cancelled() {
                self.settle(*id, RequestStatus::Cancelled).await;
                continue;
            }

            let job = match tracker.mark_processing(job_id, attempt).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::info!(job_id = %job_id, error = %e, "Job no longer dispatchable");
                    self.settle(*id, RequestStatus::Cancelled).await;
                    continue;
                }
            };
            self.registries
                .queue
                .synchronize_state(job_id, WorkflowSignal::Processing)
                .await;

            let mut active = self.active.write().await;
            let Some(request) = active.get_mut(id) else {
                continue;
            };
            request.status = RequestStatus::InFlight;
            request.started_at.get_or_insert_with(Utc::now);
            request.retry_count = job.retry_count;
            request.payload.retry_count = job.retry_count;
            request.payload.timestamp = Utc::now();
            started.push(Attempt {
                request_id: *id,
                job_id,
                payload: request.payload.clone(),
                cancel: request.cancel.clone(),
            });
        }
        started
    }

    async fn transmit(&self, attempts: &[Attempt]) -> Transmit {
        let send = async {
            match attempts {
                [single] => self.engine.send_document_analysis(&single.payload).await,
                many => {
                    let batch = BatchProcessingPayload::new(
                        new_id(),
                        many.iter().map(|a| a.payload.clone()).collect(),
                        Utc::now(),
                    );
                    tracing::debug!(batch_id = %batch.batch_id, jobs = batch.total_jobs, "Sending batch");
                    self.engine.send_batch(&batch).await
                }
            }
        };
        let watch = single_token(attempts);
        tokio::select! {
            _ = watch.cancelled() => Transmit::Cancelled,
            result = send => match result {
                Ok(receipt) => Transmit::Delivered(receipt),
                Err(e) => Transmit::Failed(e),
            },
        }
    }

    async fn mark_awaiting(&self, attempt: &Attempt, receipt: &DispatchReceipt) {
        bump(&self.counters.dispatched);
        match self
            .registries
            .tracker
            .record_dispatched(attempt.job_id, receipt.execution_id.clone())
            .await
        {
            Ok(_) => {}
            Err(StoreError::AlreadyTerminal(JobStatus::Cancelled)) => {
                // Cancelled while the send was in flight.
                self.settle(attempt.request_id, RequestStatus::Cancelled).await;
                if let Some(execution_id) = &receipt.execution_id {
                    if let Err(e) = self.engine.cancel_execution(execution_id).await {
                        tracing::warn!(job_id = %attempt.job_id, error = %e, "Could not stop remote execution");
                    }
                }
                return;
            }
            Err(e) => {
                // A callback already settled the job.
                tracing::debug!(job_id = %attempt.job_id, error = %e, "Dispatch receipt arrived late");
                return;
            }
        }

        if let Some(request) = self.active.write().await.get_mut(&attempt.request_id) {
            request.status = RequestStatus::AwaitingCallback;
            request.execution_id = receipt.execution_id.clone();
            request.last_error = None;
        }
        tracing::info!(
            job_id = %attempt.job_id,
            execution_id = receipt.execution_id.as_deref().unwrap_or(""),
            "Payload accepted by workflow engine",
        );
    }

    /// Record a failed attempt. Returns whether the request will be retried.
    async fn record_failure(&self, attempt: &Attempt, error: &WebhookError) -> bool {
        let tracker = &self.registries.tracker;
        let message = error.to_string();

        if !error.is_retryable() {
            tracing::error!(job_id = %attempt.job_id, error = %error, "Dispatch failed permanently");
            if let Err(e) = tracker.fail_job(attempt.job_id, &message).await {
                tracing::debug!(job_id = %attempt.job_id, error = %e, "Job not failed");
            }
            self.fail_request(attempt, &message).await;
            return false;
        }

        match tracker.record_attempt_failure(attempt.job_id, &message).await {
            Ok((job, AttemptOutcome::WillRetry { attempt: retry_count })) => {
                bump(&self.counters.retried);
                self.registries
                    .queue
                    .synchronize_state(job.id, WorkflowSignal::Retry)
                    .await;
                if let Some(request) = self.active.write().await.get_mut(&attempt.request_id) {
                    request.status = RequestStatus::Retrying;
                    request.retry_count = retry_count;
                    request.last_error = Some(message);
                }
                true
            }
            Ok((job, AttemptOutcome::Exhausted)) => {
                tracing::error!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    error = %error,
                    "Dispatch retries exhausted",
                );
                self.fail_request(attempt, &message).await;
                false
            }
            Err(e) => {
                tracing::info!(job_id = %attempt.job_id, error = %e, "Job settled while retrying");
                self.settle(attempt.request_id, RequestStatus::Cancelled).await;
                false
            }
        }
    }

    async fn fail_request(&self, attempt: &Attempt, message: &str) {
        self.settle(attempt.request_id, RequestStatus::Failed).await;
        let queue = &self.registries.queue;
        queue
            .synchronize_state(attempt.job_id, WorkflowSignal::Failed)
            .await;
        for path in &attempt.payload.file_paths {
            queue
                .record_history(
                    &attempt.payload.deal_name,
                    path,
                    HistoryKind::Error,
                    serde_json::json!({ "jobId": attempt.job_id, "error": message }),
                )
                .await;
        }
    }

    /// The request's token fired. The job keeps its status: an operator
    /// cancel has already settled it, anything else leaves it resumable.
    async fn withdraw(&self, attempt: &Attempt) {
        self.settle(attempt.request_id, RequestStatus::Cancelled).await;
        tracing::info!(job_id = %attempt.job_id, request_id = %attempt.request_id, "Outbound request withdrawn");
    }

    /// Drop a request from the pool and count its outcome.
    async fn settle(&self, request_id: EntityId, status: RequestStatus) {
        if self.active.write().await.remove(&request_id).is_none() {
            return;
        }
        match status {
            RequestStatus::Failed => bump(&self.counters.failed),
            RequestStatus::Cancelled => bump(&self.counters.cancelled),
            _ => {}
        }
    }
}

fn is_settled(status: RequestStatus) -> bool {
    matches!(
        status,
        RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
    )
}

/// The token of a lone request; batches are never cancelled mid-send.
fn single_token(attempts: &[Attempt]) -> CancellationToken {
    match attempts {
        [single] => single.cancel.clone(),
        _ => CancellationToken::new(),
    }
}
