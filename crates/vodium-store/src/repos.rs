//! Repositories over the shared store, one per aggregate.
//!
//! Protocol-critical compound mutations (gated inserts, claim, barrier
//! release) run under a single write lock: a claim either sees `Pending`
//! and installs the new token with the transition, or sees something else
//! and changes nothing.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use vodium_models::{
    JobCategory, JobId, JobRecord, JobState, RegistrationToken, Runner, RunnerId, RunnerJobId,
    RunnerJobKind, RunnerJobRecord, RunnerJobState, VideoId, VideoRecord, VideoState,
};

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryStore;

/// Local job ledger access.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<MemoryStore>,
}

impl JobRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Insert a job, resolving its gating state against the parent under
    /// one lock. A parent that already failed or was cancelled poisons the
    /// child immediately instead of leaving it waiting forever.
    pub async fn insert(&self, mut job: JobRecord) -> StoreResult<JobRecord> {
        let mut t = self.store.tables.write().await;

        if let Some(parent_id) = job.parent_id.clone() {
            let parent = t
                .jobs
                .get(&parent_id)
                .ok_or_else(|| StoreError::JobNotFound(parent_id.to_string()))?;
            match parent.state {
                JobState::Completed => job.state = JobState::Ready,
                JobState::Failed => job.mark_failed("parent job failed"),
                JobState::Cancelled => job.mark_cancelled(),
                _ => job.state = JobState::WaitingForParent,
            }
            t.job_children
                .entry(parent_id)
                .or_default()
                .push(job.id.clone());
        } else {
            job.state = JobState::Ready;
        }

        job.touch();
        t.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Insert a barrier job gated on the given predecessors. The barrier is
    /// never scheduled; it completes when its last outstanding predecessor
    /// does, and fails as soon as any predecessor fails.
    pub async fn insert_barrier(
        &self,
        mut job: JobRecord,
        awaits: &[JobId],
    ) -> StoreResult<JobRecord> {
        let mut t = self.store.tables.write().await;

        let mut outstanding = Vec::new();
        let mut any_failed = false;
        let mut any_cancelled = false;
        for dep in awaits {
            let dep_job = t
                .jobs
                .get(dep)
                .ok_or_else(|| StoreError::JobNotFound(dep.to_string()))?;
            match dep_job.state {
                JobState::Completed => {}
                JobState::Failed => any_failed = true,
                JobState::Cancelled => any_cancelled = true,
                _ => outstanding.push(dep.clone()),
            }
        }

        if any_failed {
            job.mark_failed("gating job failed");
        } else if any_cancelled {
            job.mark_cancelled();
        } else if outstanding.is_empty() {
            job.mark_completed();
        } else {
            job.state = JobState::Waiting;
            for dep in &outstanding {
                t.barrier_waiters
                    .entry(dep.clone())
                    .or_default()
                    .push(job.id.clone());
            }
            t.barrier_remaining.insert(job.id.clone(), outstanding.len());
        }

        t.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> StoreResult<JobRecord> {
        self.store
            .tables
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))
    }

    pub async fn try_get(&self, id: &JobId) -> Option<JobRecord> {
        self.store.tables.read().await.jobs.get(id).cloned()
    }

    /// Mutate a job under the write lock and return the updated record.
    pub async fn update<F>(&self, id: &JobId, f: F) -> StoreResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut t = self.store.tables.write().await;
        let job = t
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
        f(job);
        job.touch();
        Ok(job.clone())
    }

    /// Optimistic `Ready -> Active` claim; exactly one caller wins.
    pub async fn try_mark_active(&self, id: &JobId) -> StoreResult<bool> {
        let mut t = self.store.tables.write().await;
        let job = t
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
        if job.state != JobState::Ready {
            return Ok(false);
        }
        job.mark_started();
        Ok(true)
    }

    /// Ready jobs sorted by priority (lower first), then creation order.
    pub async fn ready_jobs(&self) -> Vec<JobRecord> {
        let t = self.store.tables.read().await;
        let mut jobs: Vec<JobRecord> = t
            .jobs
            .values()
            .filter(|j| j.state == JobState::Ready)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        jobs
    }

    pub async fn children_of(&self, id: &JobId) -> Vec<JobRecord> {
        let t = self.store.tables.read().await;
        t.job_children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| t.jobs.get(c).cloned()).collect())
            .unwrap_or_default()
    }

    pub async fn has_children(&self, id: &JobId) -> bool {
        let t = self.store.tables.read().await;
        t.job_children.get(id).is_some_and(|c| !c.is_empty())
    }

    /// Barriers gated on the given job.
    pub async fn barriers_waiting_on(&self, id: &JobId) -> Vec<JobId> {
        let t = self.store.tables.read().await;
        t.barrier_waiters.get(id).cloned().unwrap_or_default()
    }

    /// Record one predecessor outcome on a barrier; returns how many are
    /// still outstanding.
    pub async fn decrement_barrier(&self, barrier_id: &JobId) -> StoreResult<usize> {
        let mut t = self.store.tables.write().await;
        let remaining = t
            .barrier_remaining
            .get_mut(barrier_id)
            .ok_or_else(|| StoreError::JobNotFound(barrier_id.to_string()))?;
        *remaining = remaining.saturating_sub(1);
        Ok(*remaining)
    }

    pub async fn count_by_state(&self, state: JobState) -> usize {
        let t = self.store.tables.read().await;
        t.jobs.values().filter(|j| j.state == state).count()
    }

    /// Drop terminal jobs older than the retention window; returns how many
    /// were removed.
    pub async fn purge_finished(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut t = self.store.tables.write().await;
        let doomed: Vec<JobId> = t
            .jobs
            .values()
            .filter(|j| {
                j.state.is_terminal() && j.finished_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|j| j.id.clone())
            .collect();
        for id in &doomed {
            t.jobs.remove(id);
            t.job_children.remove(id);
            t.barrier_waiters.remove(id);
            t.barrier_remaining.remove(id);
        }
        if !doomed.is_empty() {
            debug!(purged = doomed.len(), "Purged finished jobs past retention");
        }
        doomed.len()
    }
}

/// Runner job ledger access.
#[derive(Clone)]
pub struct RunnerJobRepository {
    store: Arc<MemoryStore>,
}

impl RunnerJobRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Insert a runner job, resolving gating against its parent under one
    /// lock.
    pub async fn insert(&self, mut job: RunnerJobRecord) -> StoreResult<RunnerJobRecord> {
        let mut t = self.store.tables.write().await;

        if let Some(parent_uuid) = job.parent_uuid.clone() {
            let parent = t
                .runner_jobs
                .get(&parent_uuid)
                .ok_or_else(|| StoreError::RunnerJobNotFound(parent_uuid.to_string()))?;
            match parent.state {
                RunnerJobState::Completed => job.state = RunnerJobState::Pending,
                RunnerJobState::Errored | RunnerJobState::Cancelled => {
                    job.state = RunnerJobState::Cancelled;
                    job.finished_at = Some(Utc::now());
                }
                _ => job.state = RunnerJobState::WaitingForParentJob,
            }
            t.runner_job_children
                .entry(parent_uuid)
                .or_default()
                .push(job.uuid.clone());
        }

        job.touch();
        t.runner_jobs.insert(job.uuid.clone(), job.clone());
        Ok(job)
    }

    pub async fn get(&self, uuid: &RunnerJobId) -> StoreResult<RunnerJobRecord> {
        self.store
            .tables
            .read()
            .await
            .runner_jobs
            .get(uuid)
            .cloned()
            .ok_or_else(|| StoreError::RunnerJobNotFound(uuid.to_string()))
    }

    /// Run a closure against the record under the write lock; the closure's
    /// return value is passed through. This is the primitive the registry
    /// builds its atomic transition-plus-token-rotation steps on.
    pub async fn update_with<T, F>(&self, uuid: &RunnerJobId, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut RunnerJobRecord) -> T,
    {
        let mut t = self.store.tables.write().await;
        let job = t
            .runner_jobs
            .get_mut(uuid)
            .ok_or_else(|| StoreError::RunnerJobNotFound(uuid.to_string()))?;
        let out = f(job);
        job.touch();
        Ok(out)
    }

    /// Unleased pending jobs ordered by priority then age, optionally
    /// filtered by kind.
    pub async fn list_available(
        &self,
        kinds: Option<&[RunnerJobKind]>,
    ) -> Vec<RunnerJobRecord> {
        let t = self.store.tables.read().await;
        let mut jobs: Vec<RunnerJobRecord> = t
            .runner_jobs
            .values()
            .filter(|j| j.state == RunnerJobState::Pending)
            .filter(|j| kinds.map(|ks| ks.contains(&j.kind)).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        jobs
    }

    /// Optimistic claim: the first caller that still sees `Pending` wins
    /// and the token/lease are installed atomically with the transition.
    pub async fn try_claim(
        &self,
        uuid: &RunnerJobId,
        runner_id: &RunnerId,
        token: String,
        lease_expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<RunnerJobRecord>> {
        let mut t = self.store.tables.write().await;
        let job = t
            .runner_jobs
            .get_mut(uuid)
            .ok_or_else(|| StoreError::RunnerJobNotFound(uuid.to_string()))?;
        if job.state != RunnerJobState::Pending {
            return Ok(None);
        }
        job.state = RunnerJobState::Processing;
        job.runner_id = Some(runner_id.clone());
        job.job_token = Some(token);
        job.lease_expires_at = Some(lease_expires_at);
        job.started_at.get_or_insert_with(Utc::now);
        job.touch();
        Ok(Some(job.clone()))
    }

    pub async fn children_of(&self, uuid: &RunnerJobId) -> Vec<RunnerJobRecord> {
        let t = self.store.tables.read().await;
        t.runner_job_children
            .get(uuid)
            .map(|ids| {
                ids.iter()
                    .filter_map(|c| t.runner_jobs.get(c).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Processing jobs whose lease lapsed before `now`.
    pub async fn expired_leases(&self, now: DateTime<Utc>) -> Vec<RunnerJobId> {
        let t = self.store.tables.read().await;
        t.runner_jobs
            .values()
            .filter(|j| {
                j.state == RunnerJobState::Processing
                    && j.lease_expires_at.map(|at| at < now).unwrap_or(false)
            })
            .map(|j| j.uuid.clone())
            .collect()
    }

    pub async fn count_by_state(&self, state: RunnerJobState) -> usize {
        let t = self.store.tables.read().await;
        t.runner_jobs.values().filter(|j| j.state == state).count()
    }
}

/// Registered runner access.
#[derive(Clone)]
pub struct RunnerRepository {
    store: Arc<MemoryStore>,
}

impl RunnerRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn add_registration_token(&self, token: RegistrationToken) {
        let mut t = self.store.tables.write().await;
        t.registration_tokens.insert(token.token.clone(), token);
    }

    pub async fn find_registration_token(&self, secret: &str) -> Option<RegistrationToken> {
        let t = self.store.tables.read().await;
        t.registration_tokens.get(secret).cloned()
    }

    pub async fn insert(&self, runner: Runner) {
        let mut t = self.store.tables.write().await;
        t.runners.insert(runner.id.clone(), runner);
    }

    pub async fn get(&self, id: &RunnerId) -> StoreResult<Runner> {
        self.store
            .tables
            .read()
            .await
            .runners
            .get(id)
            .cloned()
            .ok_or(StoreError::RunnerNotFound)
    }

    /// Look up a runner by its long-lived credential and refresh its
    /// last-contact timestamp.
    pub async fn authenticate(&self, credential: &str) -> Option<Runner> {
        let mut t = self.store.tables.write().await;
        let runner = t.runners.values_mut().find(|r| r.token == credential)?;
        runner.touch_contact();
        Some(runner.clone())
    }

    pub async fn remove_by_token(&self, credential: &str) -> bool {
        let mut t = self.store.tables.write().await;
        let id = t
            .runners
            .values()
            .find(|r| r.token == credential)
            .map(|r| r.id.clone());
        match id {
            Some(id) => t.runners.remove(&id).is_some(),
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<Runner> {
        let t = self.store.tables.read().await;
        t.runners.values().cloned().collect()
    }
}

/// Video access, including the per-video pending-job counters.
#[derive(Clone)]
pub struct VideoRepository {
    store: Arc<MemoryStore>,
}

impl VideoRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Idempotent insert: returns the existing record when the id is
    /// already present.
    pub async fn load_or_create(
        &self,
        id: VideoId,
        name: impl Into<String>,
        state: VideoState,
    ) -> VideoRecord {
        let mut t = self.store.tables.write().await;
        t.videos
            .entry(id.clone())
            .or_insert_with(|| VideoRecord::new(id, name, state))
            .clone()
    }

    pub async fn get(&self, id: &VideoId) -> StoreResult<VideoRecord> {
        self.store
            .tables
            .read()
            .await
            .videos
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::VideoNotFound(id.to_string()))
    }

    pub async fn try_get(&self, id: &VideoId) -> Option<VideoRecord> {
        self.store.tables.read().await.videos.get(id).cloned()
    }

    pub async fn update<F>(&self, id: &VideoId, f: F) -> StoreResult<VideoRecord>
    where
        F: FnOnce(&mut VideoRecord),
    {
        let mut t = self.store.tables.write().await;
        let video = t
            .videos
            .get_mut(id)
            .ok_or_else(|| StoreError::VideoNotFound(id.to_string()))?;
        f(video);
        video.updated_at = Utc::now();
        Ok(video.clone())
    }

    pub async fn delete(&self, id: &VideoId) -> bool {
        let mut t = self.store.tables.write().await;
        t.videos.remove(id).is_some()
    }

    /// Atomically bump the pending counter; returns the new value.
    pub async fn increment_pending(&self, id: &VideoId, category: JobCategory) -> i64 {
        let cell = self.store.pending_cell((id.clone(), category)).await;
        cell.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Atomically drop the pending counter; returns the new value.
    pub async fn decrement_pending(&self, id: &VideoId, category: JobCategory) -> i64 {
        let cell = self.store.pending_cell((id.clone(), category)).await;
        cell.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub async fn pending_count(&self, id: &VideoId, category: JobCategory) -> i64 {
        let cell = self.store.pending_cell((id.clone(), category)).await;
        cell.load(Ordering::SeqCst)
    }
}
