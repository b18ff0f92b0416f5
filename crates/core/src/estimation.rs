//! Operator-facing processing-time estimates keyed by file extension.
//!
//! Estimates only feed ETA displays and the queue's estimated wait; they never
//! influence scheduling order.

use std::path::Path;

/// Fallback estimate for unknown or missing extensions.
pub const DEFAULT_ESTIMATE_SECS: u32 = 60;

/// Estimated analysis seconds per extension (lowercase, no dot).
const EXTENSION_ESTIMATES: &[(&str, u32)] = &[
    ("pdf", 45),
    ("docx", 30),
    ("doc", 35),
    ("xlsx", 60),
    ("xls", 65),
    ("csv", 20),
    ("txt", 10),
    ("pptx", 50),
    ("png", 25),
    ("jpg", 25),
    ("jpeg", 25),
    ("tif", 40),
    ("tiff", 40),
];

/// Estimate analysis duration in seconds for a document path.
pub fn estimate_duration_secs(path: &str) -> u32 {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .and_then(|ext| {
            EXTENSION_ESTIMATES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, secs)| *secs)
        })
        .unwrap_or(DEFAULT_ESTIMATE_SECS)
}

/// Sum of estimates for a set of paths.
pub fn estimate_total_secs<'a>(paths: impl IntoIterator<Item = &'a str>) -> u64 {
    paths
        .into_iter()
        .map(|p| u64::from(estimate_duration_secs(p)))
        .sum()
}
