//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Runner job not found: {0}")]
    RunnerJobNotFound(String),

    #[error("Runner not found")]
    RunnerNotFound,

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
