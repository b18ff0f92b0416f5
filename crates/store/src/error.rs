use docrelay_core::error::CoreError;
use docrelay_core::scheduling::JobStatus;

/// Errors raised by the queue, tracker, key store and snapshot persister.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document '{path}' for deal '{deal}' is already queued")]
    DuplicateSubmission { deal: String, path: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Retry limit reached ({retry_count}/{max_retries})")]
    RetryLimitReached { retry_count: u32, max_retries: u32 },

    #[error("Job is already {0}")]
    AlreadyTerminal(JobStatus),

    #[error("Snapshot I/O failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            StoreError::Invalid(msg) => CoreError::Validation(msg),
            StoreError::DuplicateSubmission { .. }
            | StoreError::InvalidTransition { .. }
            | StoreError::RetryLimitReached { .. }
            | StoreError::AlreadyTerminal(_) => CoreError::Conflict(err.to_string()),
            StoreError::Persistence(_) | StoreError::Serialization(_) => {
                CoreError::Internal(err.to_string())
            }
        }
    }
}
