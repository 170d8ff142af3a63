//! Runner protocol error types.
//!
//! Conflicts (stale token, wrong-state transition) are deliberately
//! distinct from `JobNotFound`: a runner retrying with a dead token must be
//! able to tell "someone else owns this now" from "this job is gone".

use thiserror::Error;

use vodium_models::RunnerJobState;
use vodium_store::StoreError;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Runner job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown runner credential")]
    UnknownRunner,

    #[error("Invalid registration token")]
    InvalidRegistrationToken,

    #[error("Job token is stale or does not match the current lease")]
    StaleToken,

    #[error("Job is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: RunnerJobState,
    },

    #[error("Completion processing failed: {0}")]
    Hook(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl RunnerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(expected: &'static str, actual: RunnerJobState) -> Self {
        Self::InvalidState { expected, actual }
    }

    /// Whether this is a conflict with the job's current claim/state rather
    /// than a missing resource or a caller bug.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RunnerError::StaleToken | RunnerError::InvalidState { .. }
        )
    }
}

impl From<StoreError> for RunnerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunnerJobNotFound(id) => RunnerError::JobNotFound(id),
            StoreError::RunnerNotFound => RunnerError::UnknownRunner,
            other => RunnerError::Store(other),
        }
    }
}
