//! Typed environment-variable lookups for `from_env` constructors.
//!
//! Unset variables fall back to the given default; set but unparseable
//! values are reported instead of silently replaced.

use std::str::FromStr;

use crate::error::CoreError;

/// String value, or `default` when unset.
pub fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Optional string value; empty counts as unset.
pub fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parsed value, or `default` when unset.
pub fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Boolean accepting `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn bool_var(name: &str, default: bool) -> Result<bool, CoreError> {
    match std::env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| CoreError::Validation(format!("{name} must be a boolean, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list with blanks dropped.
pub fn list_var(name: &str, default: &str) -> Vec<String> {
    string_var(name, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
