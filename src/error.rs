use thiserror::Error;

use crate::scheduler::JobState;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Gear not found: {0}")]
    GearNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobState, to: JobState },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A guarded update lost a race. Callers inside the queue retry or skip.
    #[error("Stale claim on {0}")]
    StaleClaim(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QueueError::JobNotFound(_)
                | QueueError::BatchNotFound(_)
                | QueueError::GearNotFound(_)
                | QueueError::ContainerNotFound(_)
        )
    }

    /// Errors the caller caused and can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueueError::Validation(_)
                | QueueError::InvalidStateTransition { .. }
                | QueueError::InvalidState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
