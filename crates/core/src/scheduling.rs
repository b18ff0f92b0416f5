//! Priority bands, trigger kinds and the job state machine.
//!
//! Shared by the queue, the tracker and the dispatcher so that ordering and
//! lifecycle rules have exactly one definition.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Coarse ordering tier applied before FIFO tie-breaking.
///
/// Variants are declared lowest-first so the derived `Ord` ranks
/// `High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(CoreError::Validation(format!(
                "Unknown priority '{other}' (expected high, normal or low)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerType
// ---------------------------------------------------------------------------

/// What caused a job to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    FileUpload,
    Scheduled,
    Api,
    Retry,
}

impl Default for TriggerType {
    fn default() -> Self {
        Self::Manual
    }
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::FileUpload => "file_upload",
            Self::Scheduled => "scheduled",
            Self::Api => "api",
            Self::Retry => "retry",
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// All variants, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Queued,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }

    /// Completed, failed and cancelled jobs accept no further work.
    ///
    /// `Failed` is terminal for scheduling but may still be retried
    /// explicitly, see [`state_machine::valid_transitions`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::JobStatus;

    /// Returns the set of statuses reachable from `from`.
    ///
    /// The only edge leaving a terminal status is the explicit retry
    /// `Failed -> Queued`.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        use JobStatus::*;
        match from {
            Pending => &[Queued, Failed, Cancelled],
            Queued => &[Processing, Failed, Cancelled],
            Processing => &[Completed, Failed, Cancelled],
            Failed => &[Queued],
            Completed | Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {from} -> {to}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    #[test]
    fn priority_orders_high_first() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_round_trips_through_str() {
        for p in [Priority::High, Priority::Normal, Priority::Low] {
            assert_eq!(Priority::from_str(p.as_str()).unwrap(), p);
        }
        assert!(Priority::from_str("urgent").is_err());
    }

    #[test]
    fn happy_path_transitions() {
        assert!(can_transition(JobStatus::Pending, JobStatus::Queued));
        assert!(can_transition(JobStatus::Queued, JobStatus::Processing));
        assert!(can_transition(JobStatus::Processing, JobStatus::Completed));
        assert!(can_transition(JobStatus::Processing, JobStatus::Failed));
    }

    #[test]
    fn retry_is_the_only_way_out_of_failed() {
        assert_eq!(valid_transitions(JobStatus::Failed), &[JobStatus::Queued]);
    }

    #[test]
    fn completed_and_cancelled_are_final() {
        assert!(valid_transitions(JobStatus::Completed).is_empty());
        assert!(valid_transitions(JobStatus::Cancelled).is_empty());
    }

    #[test]
    fn status_never_regresses() {
        assert!(!can_transition(JobStatus::Processing, JobStatus::Queued));
        assert!(!can_transition(JobStatus::Queued, JobStatus::Pending));
        assert!(!can_transition(JobStatus::Completed, JobStatus::Processing));
    }

    #[test]
    fn every_non_terminal_status_can_be_cancelled() {
        for status in JobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(can_transition(status, JobStatus::Cancelled), "{status}");
        }
    }

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = validate_transition(JobStatus::Completed, JobStatus::Queued).unwrap_err();
        assert_eq!(err, "Invalid transition: completed -> queued");
    }

    #[test]
    fn job_status_parses_wire_names() {
        assert_eq!(JobStatus::from_str("processing").unwrap(), JobStatus::Processing);
        assert!(JobStatus::from_str("paused").is_err());
    }
}
