//! Structural schemas for every payload crossing the webhook boundary.
//!
//! Schemas are JSON-schema-like documents (`type`, `required`,
//! `properties`, `items`, `enum`, `minimum`/`maximum`, `format`) checked by
//! [`SchemaValidator`]. The validator also owns the API compatibility table
//! used to refuse incompatible remote engines.

mod registry;
mod validator;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

pub use registry::builtin_schemas;
pub use validator::SchemaValidator;

/// Registered schema names.
pub mod names {
    pub const DOCUMENT_WEBHOOK_PAYLOAD: &str = "document-webhook-payload";
    pub const WEBHOOK_RESULT_PAYLOAD: &str = "webhook-result-payload";
    pub const ERROR_HANDLING_PAYLOAD: &str = "error-handling-payload";
    pub const USER_CORRECTION_PAYLOAD: &str = "user-correction-payload";
    pub const BATCH_PROCESSING_PAYLOAD: &str = "batch-processing-payload";
    pub const HEALTH_CHECK_PAYLOAD: &str = "health-check-payload";
}

/// Version of the webhook API this build speaks.
pub const API_VERSION: &str = "2.1.0";

/// `major.minor` lines accepted without warning.
pub const SUPPORTED_VERSIONS: &[&str] = &["2.0", "2.1"];

/// `major.minor` lines still accepted but scheduled for removal.
pub const DEPRECATED_VERSIONS: &[&str] = &["1.2", "1.3"];

/// A registered payload schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: String,
    /// Structural description; see the module docs for the supported keywords.
    pub definition: serde_json::Value,
    pub last_updated: Timestamp,
}

impl Schema {
    /// Conformant example payloads embedded in the definition.
    pub fn examples(&self) -> &[serde_json::Value] {
        self.definition
            .get("examples")
            .and_then(|e| e.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Top-level required field names.
    pub fn required_fields(&self) -> Vec<String> {
        self.definition
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Summary of a schema without its full definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaInfo {
    pub name: String,
    pub version: String,
    pub last_updated: Timestamp,
    pub required_fields: Vec<String>,
    pub property_count: usize,
    pub example_count: usize,
}

/// One problem found while validating a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path to the offending field (`jobs[0].dealName`), empty for the root.
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Outcome of validating one payload against one schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub schema_name: String,
    pub schema_version: String,
    pub validation_time_ms: f64,
    /// Serialized payload size in bytes.
    pub payload_size: usize,
}

impl ValidationReport {
    /// Whether `field` is named by any error.
    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Compatibility verdict for a remote engine's reported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    Supported,
    Deprecated,
    Unsupported,
}

/// The compatibility table exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityInfo {
    pub api_version: String,
    pub supported_versions: Vec<String>,
    pub deprecated_versions: Vec<String>,
}
