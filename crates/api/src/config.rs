use std::path::PathBuf;
use std::time::Duration;

use docrelay_core::env::{list_var, optional_var, parse_var, string_var};
use docrelay_core::error::CoreError;
use docrelay_webhook::WebhookConfig;

use crate::auth::AuthConfig;
use crate::engine::dispatcher::DispatcherConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Directory holding the state snapshot.
    pub data_dir: PathBuf,
    pub snapshot_interval_secs: u64,
    /// Terminal queue items older than this are swept.
    pub queue_retention_hours: i64,
    /// Terminal jobs older than this are swept.
    pub job_retention_hours: i64,
    pub cleanup_interval_secs: u64,
    /// Raw admin key imported at startup, if set.
    pub admin_api_key: Option<String>,
    /// Signing secret paired with the bootstrap admin key.
    pub admin_signing_secret: Option<String>,
    pub auth: AuthConfig,
    pub dispatcher: DispatcherConfig,
    pub webhook: WebhookConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `HOST`                   | `0.0.0.0`               |
    /// | `PORT`                   | `3000`                  |
    /// | `CORS_ORIGINS`           | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                    |
    /// | `DATA_DIR`               | `./data`                |
    /// | `SNAPSHOT_INTERVAL_SECS` | `30`                    |
    /// | `QUEUE_RETENTION_HOURS`  | `168`                   |
    /// | `JOB_RETENTION_HOURS`    | `720`                   |
    /// | `CLEANUP_INTERVAL_SECS`  | `3600`                  |
    /// | `ADMIN_API_KEY`          | unset                   |
    /// | `ADMIN_SIGNING_SECRET`   | unset                   |
    ///
    /// Auth, dispatcher and webhook settings are read by their own
    /// `from_env` constructors.
    pub fn from_env() -> Result<Self, CoreError> {
        let webhook =
            WebhookConfig::from_env().map_err(|e| CoreError::Validation(e.to_string()))?;

        Ok(Self {
            host: string_var("HOST", "0.0.0.0"),
            port: parse_var("PORT", 3000)?,
            cors_origins: list_var("CORS_ORIGINS", "http://localhost:5173"),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 30)?,
            data_dir: PathBuf::from(string_var("DATA_DIR", "./data")),
            snapshot_interval_secs: parse_var("SNAPSHOT_INTERVAL_SECS", 30)?,
            queue_retention_hours: parse_var("QUEUE_RETENTION_HOURS", 168)?,
            job_retention_hours: parse_var("JOB_RETENTION_HOURS", 720)?,
            cleanup_interval_secs: parse_var("CLEANUP_INTERVAL_SECS", 3600)?,
            admin_api_key: optional_var("ADMIN_API_KEY"),
            admin_signing_secret: optional_var("ADMIN_SIGNING_SECRET"),
            auth: AuthConfig::from_env()?,
            dispatcher: DispatcherConfig::from_env(webhook.timeout_secs)?,
            webhook,
        })
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
