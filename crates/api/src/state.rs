use std::sync::Arc;

use docrelay_core::schema::SchemaValidator;
use docrelay_core::types::Timestamp;
use docrelay_store::api_keys::ApiKeyStore;
use docrelay_store::queue::DocumentQueue;
use docrelay_store::snapshot::{Persister, Stores};
use docrelay_store::tracker::JobTracker;
use docrelay_webhook::{WebhookError, WebhookService, WorkflowEngine};

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::engine::dispatcher::Dispatcher;

/// The three record stores, shared by handlers and background tasks.
#[derive(Clone, Default)]
pub struct Registries {
    pub queue: Arc<DocumentQueue>,
    pub tracker: Arc<JobTracker>,
    pub api_keys: Arc<ApiKeyStore>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrowed view for the snapshot persister.
    pub fn stores(&self) -> Stores<'_> {
        Stores {
            queue: &self.queue,
            tracker: &self.tracker,
            api_keys: &self.api_keys,
        }
    }
}

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registries: Registries,
    pub validator: Arc<SchemaValidator>,
    pub auth: Arc<AuthManager>,
    /// Outbound client, also used for status-query fallbacks.
    pub webhook: Arc<WebhookService>,
    pub dispatcher: Arc<Dispatcher>,
    pub persister: Arc<Persister>,
    pub started_at: Timestamp,
}

impl AppState {
    /// Wire every component with the webhook client as the workflow engine.
    pub fn from_config(config: ServerConfig) -> Result<Self, WebhookError> {
        let validator = Arc::new(SchemaValidator::new());
        let webhook = Arc::new(WebhookService::new(
            config.webhook.clone(),
            Arc::clone(&validator),
        )?);
        let engine: Arc<dyn WorkflowEngine> = webhook.clone();
        Ok(Self::with_engine(config, validator, webhook, engine))
    }

    /// Like [`AppState::from_config`] but dispatching through `engine`.
    pub fn with_engine(
        config: ServerConfig,
        validator: Arc<SchemaValidator>,
        webhook: Arc<WebhookService>,
        engine: Arc<dyn WorkflowEngine>,
    ) -> Self {
        let registries = Registries::new();
        let persister = Arc::new(Persister::new(&config.data_dir));
        let auth = Arc::new(AuthManager::new(
            Arc::clone(&registries.api_keys),
            config.auth.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            engine,
            registries.clone(),
            config.dispatcher.clone(),
            Some(Arc::clone(&persister)),
        ));

        Self {
            config: Arc::new(config),
            registries,
            validator,
            auth,
            webhook,
            dispatcher,
            persister,
            started_at: chrono::Utc::now(),
        }
    }
}
