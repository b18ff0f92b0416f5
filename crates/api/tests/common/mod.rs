#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use docrelay_api::auth::AuthConfig;
use docrelay_api::config::ServerConfig;
use docrelay_api::engine::dispatcher::DispatcherConfig;
use docrelay_api::router::build_app_router;
use docrelay_api::state::AppState;
use docrelay_core::payloads::{BatchProcessingPayload, DocumentWebhookPayload};
use docrelay_core::schema::{Compatibility, SchemaValidator};
use docrelay_core::signing::{sign_body, HEADER_API_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use docrelay_store::models::job::{Job, NewJob};
use docrelay_store::models::queue_item::{NewQueueItem, WorkflowSignal};
use docrelay_webhook::engine::{DispatchReceipt, EngineHealth, RemoteExecutionStatus};
use docrelay_webhook::{WebhookConfig, WebhookError, WebhookService, WorkflowEngine};

/// Raw admin key imported into every test app.
pub const ADMIN_KEY: &str = "drk_test_admin_0123456789abcdefghijklmnopqrstuv";

/// Signing secret paired with [`ADMIN_KEY`].
pub const ADMIN_SECRET: &str = "test-admin-signing-secret";

/// Build a test `ServerConfig` with safe defaults.
///
/// Dispatch retries wait 10ms so retry scenarios finish quickly.
pub fn test_config(data_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        data_dir: data_dir.to_path_buf(),
        snapshot_interval_secs: 30,
        queue_retention_hours: 168,
        job_retention_hours: 720,
        cleanup_interval_secs: 3600,
        admin_api_key: Some(ADMIN_KEY.to_string()),
        admin_signing_secret: Some(ADMIN_SECRET.to_string()),
        auth: AuthConfig::default(),
        dispatcher: DispatcherConfig {
            max_concurrent_jobs: 2,
            max_retries: 3,
            retry_delay_ms: 10,
            poll_interval_ms: 20,
            ..Default::default()
        },
        webhook: WebhookConfig {
            // Nothing listens here; status fallbacks fail fast.
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            retry_count: 1,
            retry_delay_ms: 10,
            ..Default::default()
        },
    }
}

// ---------------------------------------------------------------------------
// Fake workflow engine
// ---------------------------------------------------------------------------

/// In-process stand-in for the remote engine.
///
/// Fails the first `failures` dispatches with a 504, holds each send for
/// `delay`, and records what it accepted. Health checks fail while `down`.
#[derive(Default)]
pub struct FakeEngine {
    failures: AtomicU32,
    delay: Duration,
    down: AtomicBool,
    calls: AtomicU32,
    batches: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    accepted: Mutex<Vec<DocumentWebhookPayload>>,
    stopped: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batch sends among [`Self::calls`].
    pub fn batches(&self) -> u32 {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// File paths of accepted payloads, in acceptance order.
    pub fn accepted_paths(&self) -> Vec<String> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .flat_map(|p| p.file_paths.clone())
            .collect()
    }

    pub fn stopped_executions(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn receipt(&self) -> DispatchReceipt {
        DispatchReceipt {
            status_code: 200,
            execution_id: Some(format!("exec-{}", self.calls())),
            body: serde_json::json!({}),
        }
    }
}

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn send_document_analysis(
        &self,
        payload: &DocumentWebhookPayload,
    ) -> Result<DispatchReceipt, WebhookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WebhookError::ApiError {
                status: 504,
                body: "gateway timeout".into(),
            });
        }
        self.accepted.lock().unwrap().push(payload.clone());
        Ok(self.receipt())
    }

    async fn send_batch(&self, payload: &BatchProcessingPayload) -> Result<DispatchReceipt, WebhookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.accepted.lock().unwrap().extend(payload.jobs.iter().cloned());
        Ok(self.receipt())
    }

    async fn get_execution_status(&self, execution_id: &str) -> Result<RemoteExecutionStatus, WebhookError> {
        Ok(RemoteExecutionStatus {
            id: execution_id.to_string(),
            status: "running".into(),
            finished: false,
            started_at: None,
            stopped_at: None,
            data: serde_json::Value::Null,
        })
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), WebhookError> {
        self.stopped.lock().unwrap().push(execution_id.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<EngineHealth, WebhookError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(WebhookError::ApiError {
                status: 503,
                body: "engine down".into(),
            });
        }
        Ok(EngineHealth {
            status: "ok".into(),
            version: "2.1.0".into(),
            compatibility: Compatibility::Supported,
            latency_ms: 1,
            services: serde_json::json!({}),
        })
    }
}

// ---------------------------------------------------------------------------
// Test app
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    _data_dir: TempDir,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Tear the app down and build a new one over the same data directory,
    /// the way a process restart would. The dispatcher is left stopped.
    pub async fn restart(self, engine: FakeEngine) -> TestApp {
        let TestApp { _data_dir: data_dir, .. } = self;
        build_test_app_in(engine, data_dir).await
    }
}

/// Build the full application router around `engine`, with the admin key
/// imported. The dispatcher is left stopped.
pub async fn build_test_app(engine: FakeEngine) -> TestApp {
    build_test_app_in(engine, TempDir::new().unwrap()).await
}

/// Same as [`build_test_app`], restoring whatever snapshot `data_dir` holds.
async fn build_test_app_in(engine: FakeEngine, data_dir: TempDir) -> TestApp {
    let config = test_config(data_dir.path());

    let validator = Arc::new(SchemaValidator::new());
    let webhook = Arc::new(WebhookService::new(config.webhook.clone(), Arc::clone(&validator)).unwrap());
    let engine = Arc::new(engine);
    let state = AppState::with_engine(
        config.clone(),
        validator,
        webhook,
        Arc::clone(&engine) as Arc<dyn WorkflowEngine>,
    );
    state.persister.restore(state.registries.stores()).await.unwrap();
    state
        .auth
        .import_bootstrap_key(ADMIN_KEY, Some(ADMIN_SECRET.to_string()))
        .await
        .unwrap();

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        engine,
        _data_dir: data_dir,
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Queue `paths` for `deal`, create one job for them and walk it to
/// `processing`, as if the dispatcher had sent it.
pub async fn seed_processing_job(state: &AppState, deal: &str, paths: &[&str]) -> Job {
    let registries = &state.registries;
    let items = registries
        .queue
        .enqueue_many(
            paths
                .iter()
                .map(|path| NewQueueItem {
                    deal_name: deal.to_string(),
                    document_path: path.to_string(),
                    priority: Default::default(),
                    metadata: None,
                })
                .collect(),
        )
        .await
        .unwrap();
    let job = registries
        .tracker
        .create_job(NewJob {
            deal_name: deal.to_string(),
            file_paths: paths.iter().map(|p| p.to_string()).collect(),
            trigger_type: Default::default(),
            workflow_type: Default::default(),
            priority: Default::default(),
            max_retries: 3,
            metadata: None,
        })
        .await
        .unwrap();
    for item in &items {
        registries.queue.attach_job(item.id, job.id).await.unwrap();
    }
    registries.tracker.mark_queued(job.id, None).await.unwrap();
    registries.tracker.mark_processing(job.id, 1).await.unwrap();
    registries
        .queue
        .synchronize_state(job.id, WorkflowSignal::Processing)
        .await;
    registries.tracker.get_job(job.id).await.unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a GET request without authentication.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a request authenticated with `X-API-Key` only.
pub async fn send_with_key(
    app: Router,
    method: Method,
    uri: &str,
    key: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(HEADER_API_KEY, key);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get_as_admin(app: Router, uri: &str) -> Response<Body> {
    send_with_key(app, Method::GET, uri, ADMIN_KEY, None).await
}

pub async fn post_as_admin(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send_with_key(app, Method::POST, uri, ADMIN_KEY, Some(body)).await
}

/// POST raw bytes signed with `secret`, the way the engine sends callbacks.
pub async fn post_signed(app: Router, uri: &str, key: &str, secret: &str, body: &[u8]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header(HEADER_API_KEY, key)
        .header(HEADER_SIGNATURE, sign_body(secret, body))
        .header(HEADER_TIMESTAMP, chrono::Utc::now().timestamp().to_string())
        .body(Body::from(body.to_vec()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
