use docrelay_core::error::CoreError;
use docrelay_core::schema::ValidationIssue;

/// Errors from the webhook client layer.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Workflow engine error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The outbound payload failed schema validation; nothing was sent.
    #[error("Payload failed '{schema}' validation: {}", join_issues(.issues))]
    Validation {
        schema: String,
        issues: Vec<ValidationIssue>,
    },

    /// The engine reports an API version this build cannot talk to.
    #[error("Incompatible workflow engine version '{0}'")]
    IncompatibleEngine(String),

    #[error("Invalid webhook configuration: {0}")]
    InvalidConfig(String),

    #[error("Payload encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl WebhookError {
    /// Whether another attempt could succeed.
    ///
    /// Network failures, 5xx, 408 and 429 are transient; validation errors
    /// and other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_builder() && !e.is_decode(),
            Self::ApiError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Validation { .. }
            | Self::IncompatibleEngine(_)
            | Self::InvalidConfig(_)
            | Self::Serialization(_)
            | Self::Core(_) => false,
        }
    }

    /// HTTP status reported by the engine, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> WebhookError {
        WebhookError::ApiError {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(api(408).is_retryable());
        assert!(api(429).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(404).is_retryable());
    }

    #[test]
    fn validation_is_permanent_and_lists_fields() {
        let err = WebhookError::Validation {
            schema: "document-webhook-payload".into(),
            issues: vec![ValidationIssue::new("dealName", "is required")],
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("dealName: is required"));
    }

    #[test]
    fn display_api_error() {
        assert_eq!(api(502).to_string(), "Workflow engine error (502): ");
    }
}
