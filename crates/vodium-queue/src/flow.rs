//! Sequential job flows.
//!
//! A flow is an ordered list of job groups: jobs inside a group run
//! concurrently, each group is gated on full completion of the one before
//! it. Flows are a planning structure only; they are realized as parent
//! links in the ledger (with an internal barrier job when the gating group
//! has more than one member) and never persisted as their own entity.

use vodium_models::{JobId, JobPayload};

/// A job to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: JobPayload,
    pub priority: i32,
    /// Gate on an already-persisted job
    pub parent_id: Option<JobId>,
    /// Override the queue's default attempt budget
    pub max_attempts: Option<u32>,
}

impl NewJob {
    pub fn new(payload: JobPayload, priority: i32) -> Self {
        Self {
            payload,
            priority,
            parent_id: None,
            max_attempts: None,
        }
    }

    pub fn with_parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Ordered groups of jobs with barrier-style gating between consecutive
/// groups.
#[derive(Debug, Clone, Default)]
pub struct SequentialJobFlow {
    groups: Vec<Vec<NewJob>>,
}

impl SequentialJobFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group gated on full completion of the previous one.
    /// Empty groups are dropped.
    pub fn group(mut self, jobs: Vec<NewJob>) -> Self {
        if !jobs.is_empty() {
            self.groups.push(jobs);
        }
        self
    }

    pub fn groups(&self) -> &[Vec<NewJob>] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<Vec<NewJob>> {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn job_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}
