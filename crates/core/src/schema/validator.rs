use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::error::CoreError;

use super::{
    builtin_schemas, Compatibility, CompatibilityInfo, Schema, SchemaInfo, ValidationIssue,
    ValidationReport, API_VERSION, DEPRECATED_VERSIONS, SUPPORTED_VERSIONS,
};

/// Registry of payload schemas plus the structural checker that applies them.
///
/// Lookups take a read lock; only `update_schema` writes. Strict mode is a
/// process-wide flag so operators can flip it without re-registering schemas.
pub struct SchemaValidator {
    schemas: RwLock<HashMap<String, Schema>>,
    strict: AtomicBool,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    /// Validator preloaded with the built-in schemas, lenient mode.
    pub fn new() -> Self {
        let schemas = builtin_schemas()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        Self {
            schemas: RwLock::new(schemas),
            strict: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Schema>> {
        self.schemas.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Schema>> {
        self.schemas.write().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check `payload` against the named schema.
    ///
    /// Returns `NotFound` only when the schema is unknown; structural
    /// problems are reported inside the [`ValidationReport`].
    pub fn validate_payload(
        &self,
        payload: &Value,
        schema_name: &str,
    ) -> Result<ValidationReport, CoreError> {
        let started = Instant::now();
        let strict = self.is_strict();

        let schemas = self.read();
        let schema = schemas.get(schema_name).ok_or_else(|| CoreError::NotFound {
            entity: "Schema",
            id: schema_name.to_string(),
        })?;

        let mut walk = Walk {
            strict,
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        walk.check(&schema.definition, payload, "");

        Ok(ValidationReport {
            valid: walk.errors.is_empty(),
            errors: walk.errors,
            warnings: walk.warnings,
            schema_name: schema.name.clone(),
            schema_version: schema.version.clone(),
            validation_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            payload_size: payload.to_string().len(),
        })
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Registered schema names, sorted.
    pub fn list_schemas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_schema(&self, name: &str) -> Option<Schema> {
        self.read().get(name).cloned()
    }

    pub fn get_schema_info(&self, name: &str) -> Option<SchemaInfo> {
        self.read().get(name).map(|schema| SchemaInfo {
            name: schema.name.clone(),
            version: schema.version.clone(),
            last_updated: schema.last_updated,
            required_fields: schema.required_fields(),
            property_count: schema
                .definition
                .get("properties")
                .and_then(Value::as_object)
                .map_or(0, |p| p.len()),
            example_count: schema.examples().len(),
        })
    }

    /// Replace (or register) a schema. The definition must be an object
    /// declaring a `type`. `last_updated` is stamped here.
    pub fn update_schema(&self, mut schema: Schema) -> Result<Schema, CoreError> {
        if schema.name.trim().is_empty() {
            return Err(CoreError::Validation("Schema name must not be empty".into()));
        }
        let has_type = schema
            .definition
            .as_object()
            .is_some_and(|d| d.contains_key("type"));
        if !has_type {
            return Err(CoreError::Validation(format!(
                "Schema '{}' must be an object with a 'type' keyword",
                schema.name
            )));
        }
        if schema.version.trim().is_empty() {
            schema.version = API_VERSION.to_string();
        }
        schema.last_updated = Utc::now();
        self.write().insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    // -----------------------------------------------------------------------
    // Modes and compatibility
    // -----------------------------------------------------------------------

    pub fn set_strict_mode(&self, strict: bool) {
        self.strict.store(strict, Ordering::Relaxed);
    }

    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::Relaxed)
    }

    pub fn api_version(&self) -> &'static str {
        API_VERSION
    }

    pub fn compatibility_info(&self) -> CompatibilityInfo {
        CompatibilityInfo {
            api_version: API_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            deprecated_versions: DEPRECATED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Classify a remote version string by its `major.minor` prefix.
    /// A leading `v` is tolerated; anything unparseable is unsupported.
    pub fn check_compatibility(&self, version: &str) -> Compatibility {
        let trimmed = version.trim().trim_start_matches('v');
        let mut parts = trimmed.split('.');
        let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
            return Compatibility::Unsupported;
        };
        if major.parse::<u32>().is_err() || minor.parse::<u32>().is_err() {
            return Compatibility::Unsupported;
        }
        let line = format!("{major}.{minor}");
        if SUPPORTED_VERSIONS.contains(&line.as_str()) {
            Compatibility::Supported
        } else if DEPRECATED_VERSIONS.contains(&line.as_str()) {
            Compatibility::Deprecated
        } else {
            Compatibility::Unsupported
        }
    }
}

// ---------------------------------------------------------------------------
// Structural walk
// ---------------------------------------------------------------------------

struct Walk {
    strict: bool,
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

fn child_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        _ => true,
    }
}

impl Walk {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(path, message));
    }

    fn check(&mut self, node: &Value, value: &Value, path: &str) {
        // `{}` accepts anything.
        let Some(node) = node.as_object() else {
            return;
        };

        if let Some(expected) = node.get("type") {
            let allowed: Vec<&str> = match expected {
                Value::String(t) => vec![t.as_str()],
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
                self.error(
                    path,
                    format!(
                        "expected {}, found {}",
                        allowed.join(" or "),
                        json_type_name(value)
                    ),
                );
                return;
            }
        }

        if let Some(Value::Array(options)) = node.get("enum") {
            if !options.contains(value) {
                let listed: Vec<String> = options
                    .iter()
                    .map(|o| o.as_str().map_or_else(|| o.to_string(), str::to_string))
                    .collect();
                self.error(path, format!("must be one of: {}", listed.join(", ")));
            }
        }

        match value {
            Value::String(s) => self.check_string(node, s, path),
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    self.check_range(node, v, path);
                }
            }
            Value::Array(items) => self.check_array(node, items, path),
            Value::Object(fields) => self.check_object(node, fields, path),
            _ => {}
        }
    }

    fn check_string(&mut self, node: &serde_json::Map<String, Value>, s: &str, path: &str) {
        if let Some(min) = node.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                self.error(path, format!("must be at least {min} characters"));
            }
        }
        match node.get("format").and_then(Value::as_str) {
            Some("date-time") if chrono::DateTime::parse_from_rfc3339(s).is_err() => {
                self.error(path, "must be an RFC 3339 date-time");
            }
            Some("uuid") if uuid::Uuid::parse_str(s).is_err() => {
                self.error(path, "must be a UUID");
            }
            _ => {}
        }
    }

    fn check_range(&mut self, node: &serde_json::Map<String, Value>, v: f64, path: &str) {
        if let Some(min) = node.get("minimum").and_then(Value::as_f64) {
            if v < min {
                self.error(path, format!("must be >= {min}"));
            }
        }
        if let Some(max) = node.get("maximum").and_then(Value::as_f64) {
            if v > max {
                self.error(path, format!("must be <= {max}"));
            }
        }
    }

    fn check_array(&mut self, node: &serde_json::Map<String, Value>, items: &[Value], path: &str) {
        if let Some(min) = node.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                self.error(path, format!("must contain at least {min} item(s)"));
            }
        }
        if let Some(item_node) = node.get("items") {
            for (i, item) in items.iter().enumerate() {
                self.check(item_node, item, &format!("{path}[{i}]"));
            }
        }
    }

    fn check_object(
        &mut self,
        node: &serde_json::Map<String, Value>,
        fields: &serde_json::Map<String, Value>,
        path: &str,
    ) {
        if let Some(Value::Array(required)) = node.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(field) {
                    self.error(&child_path(path, field), "is required");
                }
            }
        }

        let Some(Value::Object(properties)) = node.get("properties") else {
            return;
        };

        for (key, value) in fields {
            let field_path = child_path(path, key);
            match properties.get(key) {
                Some(prop) => self.check(prop, value, &field_path),
                None if self.strict => self.error(&field_path, "unexpected property"),
                None => self
                    .warnings
                    .push(ValidationIssue::new(field_path, "unexpected property")),
            }
        }
    }
}
