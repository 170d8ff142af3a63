//! Queue error types.

use thiserror::Error;

use vodium_store::StoreError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Handler failure, classified at the queue boundary.
///
/// `Transient` failures consume one attempt and come back after backoff;
/// everything else fails the job permanently and cascades to dependents.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Terminal failure: {0}")]
    Terminal(String),
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Whether the failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}
