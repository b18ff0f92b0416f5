use std::time::Duration;

use serde::{Deserialize, Serialize};

use docrelay_core::env::{bool_var, optional_var, parse_var, string_var};

use crate::error::WebhookError;

/// Placeholder shown instead of secrets in config read-backs.
const REDACTED: &str = "********";

/// Signing settings for outbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAuthConfig {
    /// Sign bodies with HMAC-SHA256 and send `X-Signature`/`X-Timestamp`.
    pub enable_hmac: bool,
    /// Secret shared with the engine for outbound signatures.
    pub shared_secret: Option<String>,
}

/// Outbound webhook configuration, hot-swappable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Engine base URL, e.g. `http://localhost:5678`.
    pub base_url: String,
    /// Sent as `X-API-Key` when set.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Attempts made by status queries on transient errors.
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Log every request and response at debug level.
    pub enable_logging: bool,
    /// Schema-validate every outbound payload before sending it.
    pub validate_payload: bool,
    pub auth: WebhookAuthConfig,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678".into(),
            api_key: None,
            timeout_secs: 30,
            retry_count: 3,
            retry_delay_ms: 1000,
            enable_logging: false,
            validate_payload: true,
            auth: WebhookAuthConfig {
                enable_hmac: false,
                shared_secret: None,
            },
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `N8N_BASE_URL`             | `http://localhost:5678` |
    /// | `N8N_API_KEY`              | unset                   |
    /// | `WEBHOOK_TIMEOUT_SECS`     | `30`                    |
    /// | `WEBHOOK_RETRY_COUNT`      | `3`                     |
    /// | `WEBHOOK_RETRY_DELAY_MS`   | `1000`                  |
    /// | `WEBHOOK_ENABLE_LOGGING`   | `false`                 |
    /// | `WEBHOOK_VALIDATE_PAYLOAD` | `true`                  |
    /// | `WEBHOOK_ENABLE_HMAC`      | `false`                 |
    /// | `WEBHOOK_SHARED_SECRET`    | unset                   |
    pub fn from_env() -> Result<Self, WebhookError> {
        let defaults = Self::default();
        let config = Self {
            base_url: string_var("N8N_BASE_URL", &defaults.base_url),
            api_key: optional_var("N8N_API_KEY"),
            timeout_secs: parse_var("WEBHOOK_TIMEOUT_SECS", defaults.timeout_secs)?,
            retry_count: parse_var("WEBHOOK_RETRY_COUNT", defaults.retry_count)?,
            retry_delay_ms: parse_var("WEBHOOK_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            enable_logging: bool_var("WEBHOOK_ENABLE_LOGGING", defaults.enable_logging)?,
            validate_payload: bool_var("WEBHOOK_VALIDATE_PAYLOAD", defaults.validate_payload)?,
            auth: WebhookAuthConfig {
                enable_hmac: bool_var("WEBHOOK_ENABLE_HMAC", false)?,
                shared_secret: optional_var("WEBHOOK_SHARED_SECRET"),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Absolute URL for an engine path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn validate(&self) -> Result<(), WebhookError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(WebhookError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(WebhookError::InvalidConfig("timeout_secs must be positive".into()));
        }
        let has_secret = self
            .auth
            .shared_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if self.auth.enable_hmac && !has_secret {
            return Err(WebhookError::InvalidConfig(
                "auth.shared_secret is required when HMAC signing is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Copy safe to return over the admin API.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some(REDACTED.into());
        }
        if copy.auth.shared_secret.is_some() {
            copy.auth.shared_secret = Some(REDACTED.into());
        }
        copy
    }

    /// Replace redaction placeholders with the secrets from `current`, so a
    /// redacted read-back can be sent back unchanged.
    pub fn keep_redacted_secrets(mut self, current: &WebhookConfig) -> Self {
        if self.api_key.as_deref() == Some(REDACTED) {
            self.api_key = current.api_key.clone();
        }
        if self.auth.shared_secret.as_deref() == Some(REDACTED) {
            self.auth.shared_secret = current.auth.shared_secret.clone();
        }
        self
    }
}
