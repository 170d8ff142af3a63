//! In-process store backing the repositories.
//!
//! The production deployment backs these tables with a relational client;
//! the orchestration crates only consume the repository APIs (CRUD, atomic
//! counters, idempotent load-or-create), so the backend can be swapped
//! without touching them.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use tokio::sync::RwLock;

use vodium_models::{
    JobCategory, JobId, JobRecord, RegistrationToken, Runner, RunnerId, RunnerJobId,
    RunnerJobRecord, VideoId, VideoRecord,
};

/// Key of a per-video pending-job counter.
pub(crate) type PendingKey = (VideoId, JobCategory);

#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) jobs: HashMap<JobId, JobRecord>,
    /// parent -> children
    pub(crate) job_children: HashMap<JobId, Vec<JobId>>,
    /// predecessor -> barriers gated on it
    pub(crate) barrier_waiters: HashMap<JobId, Vec<JobId>>,
    /// barrier -> predecessors still outstanding
    pub(crate) barrier_remaining: HashMap<JobId, usize>,

    pub(crate) runner_jobs: HashMap<RunnerJobId, RunnerJobRecord>,
    /// parent -> children
    pub(crate) runner_job_children: HashMap<RunnerJobId, Vec<RunnerJobId>>,

    pub(crate) runners: HashMap<RunnerId, Runner>,
    /// registration secret -> token record
    pub(crate) registration_tokens: HashMap<String, RegistrationToken>,

    pub(crate) videos: HashMap<VideoId, VideoRecord>,
}

/// Shared in-process store. Cheap to clone via [`Arc`]; every compound
/// mutation a repository exposes runs under a single write lock so
/// protocol-critical transitions (claim, token rotation, barrier release)
/// are atomic.
pub struct MemoryStore {
    pub(crate) tables: RwLock<Tables>,
    /// Pending-job counters, mutated only by fetch_add/fetch_sub.
    pub(crate) pending: RwLock<HashMap<PendingKey, Arc<AtomicI64>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: RwLock::new(Tables::default()),
            pending: RwLock::new(HashMap::new()),
        })
    }

    /// Counter cell for a `(video, category)` pair, created on first use.
    pub(crate) async fn pending_cell(&self, key: PendingKey) -> Arc<AtomicI64> {
        if let Some(cell) = self.pending.read().await.get(&key) {
            return Arc::clone(cell);
        }
        let mut pending = self.pending.write().await;
        Arc::clone(pending.entry(key).or_default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            pending: RwLock::new(HashMap::new()),
        }
    }
}
