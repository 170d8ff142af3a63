//! The local job queue.
//!
//! A multi-worker scheduler over the persistent ledger: jobs are picked by
//! priority (lowest value first, creation order on ties), execution is
//! bounded globally and per kind, transient failures retry with exponential
//! backoff, and permanent failures cascade over every dependent descendant
//! so a half-finished pipeline can never look complete.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use vodium_models::{
    BarrierPayload, JobId, JobKind, JobPayload, JobRecord, JobState,
};
use vodium_store::JobRepository;

use crate::error::{JobError, QueueError, QueueResult};
use crate::flow::{NewJob, SequentialJobFlow};

/// How often the scheduler re-checks the ledger even without a wake signal.
const SCHEDULER_TICK: Duration = Duration::from_millis(500);

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrent executions across all kinds
    pub worker_slots: usize,
    /// Default concurrent executions per job kind
    pub per_kind_limit: usize,
    /// Per-kind overrides of the concurrency bound
    pub kind_limits: HashMap<JobKind, usize>,
    /// Base delay for retry backoff (doubles each attempt)
    pub backoff_base: Duration,
    /// Cap on the retry backoff delay
    pub backoff_max: Duration,
    /// Attempt budget for jobs that don't override it
    pub default_max_attempts: u32,
    /// How long `shutdown` waits for in-flight jobs
    pub drain_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_slots: 4,
            per_kind_limit: 2,
            kind_limits: HashMap::new(),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(60),
            default_max_attempts: 3,
            drain_timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_slots: env_parse("QUEUE_WORKER_SLOTS", defaults.worker_slots),
            per_kind_limit: env_parse("QUEUE_PER_KIND_LIMIT", defaults.per_kind_limit),
            kind_limits: HashMap::new(),
            backoff_base: Duration::from_millis(env_parse(
                "QUEUE_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )),
            backoff_max: Duration::from_secs(env_parse(
                "QUEUE_BACKOFF_MAX_SECS",
                defaults.backoff_max.as_secs(),
            )),
            default_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", defaults.default_max_attempts),
            drain_timeout: Duration::from_secs(env_parse(
                "QUEUE_DRAIN_TIMEOUT_SECS",
                defaults.drain_timeout.as_secs(),
            )),
        }
    }

    /// Delay before the given (1-based) retry attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(2u32.pow(exp));
        delay.min(self.backoff_max)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Executes local jobs. Implementations match exhaustively over
/// [`JobPayload`]; the queue classifies returned errors.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Execute one job attempt.
    async fn execute(&self, job: &JobRecord) -> Result<(), JobError>;

    /// Called once per job that reaches `Failed` or `Cancelled` without
    /// completing, including descendants failed by cascade. Cleanup and
    /// video bookkeeping hang off this.
    async fn on_abandoned(&self, _job: &JobRecord) {}
}

/// Terminal event propagated through the dependency graph.
#[derive(Debug, Clone)]
enum Settle {
    Completed,
    Failed(String),
    Cancelled,
}

/// The local multi-worker job queue.
///
/// Explicitly constructed and explicitly drained; anything that creates
/// jobs holds a reference to the queue rather than reaching for a global.
pub struct LocalJobQueue {
    jobs: JobRepository,
    config: QueueConfig,
    handler: Arc<dyn JobHandler>,
    slots: Arc<Semaphore>,
    kind_slots: HashMap<JobKind, Arc<Semaphore>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl LocalJobQueue {
    pub fn new(
        jobs: JobRepository,
        handler: Arc<dyn JobHandler>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.worker_slots));
        let kind_slots = JobKind::ALL
            .iter()
            .filter(|k| k.is_executable())
            .map(|k| {
                let limit = config.kind_limits.get(k).copied().unwrap_or(config.per_kind_limit);
                (*k, Arc::new(Semaphore::new(limit)))
            })
            .collect();
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            jobs,
            config,
            handler,
            slots,
            kind_slots,
            wake: Notify::new(),
            shutdown,
        })
    }

    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    /// Persist a job, resolving its initial state. Returns once persisted,
    /// not once executed.
    pub async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId> {
        if *self.shutdown.borrow() {
            return Err(QueueError::ShuttingDown);
        }
        if new_job.payload.kind() == JobKind::Barrier {
            return Err(QueueError::validation("barrier jobs are internal"));
        }
        new_job
            .payload
            .validate()
            .map_err(|e| QueueError::Validation(e.to_string()))?;

        let mut record = JobRecord::new(new_job.payload, new_job.priority)
            .with_max_attempts(new_job.max_attempts.unwrap_or(self.config.default_max_attempts));
        if let Some(parent_id) = new_job.parent_id {
            record = record.with_parent(parent_id);
        }

        let stored = self.jobs.insert(record).await?;
        counter!("vodium_queue_jobs_enqueued_total", "kind" => stored.kind().as_str())
            .increment(1);
        debug!(job_id = %stored.id, kind = %stored.kind(), state = %stored.state, "Enqueued job");

        if stored.state == JobState::Ready {
            self.wake.notify_one();
        } else if stored.state.is_terminal() {
            // parent already off the success path; the job arrived dead
            self.handler.on_abandoned(&stored).await;
        }
        Ok(stored.id)
    }

    /// Persist a sequential flow: group *i+1* is gated on full completion
    /// of group *i* through parent links, with an internal barrier job when
    /// the gating group has more than one member.
    pub async fn create_sequential_flow(
        &self,
        flow: SequentialJobFlow,
    ) -> QueueResult<Vec<JobId>> {
        if *self.shutdown.borrow() {
            return Err(QueueError::ShuttingDown);
        }
        for job in flow.groups().iter().flatten() {
            job.payload
                .validate()
                .map_err(|e| QueueError::Validation(e.to_string()))?;
        }

        let mut all_ids = Vec::with_capacity(flow.job_count());
        let mut prev_group: Vec<JobId> = Vec::new();

        for group in flow.into_groups() {
            let gate = match prev_group.len() {
                0 => None,
                1 => Some(prev_group[0].clone()),
                _ => {
                    let barrier = JobRecord::new(
                        JobPayload::Barrier(BarrierPayload {
                            awaits: prev_group.clone(),
                        }),
                        vodium_models::BACKGROUND_PRIORITY,
                    );
                    let stored = self.jobs.insert_barrier(barrier, &prev_group).await?;
                    Some(stored.id)
                }
            };

            let mut group_ids = Vec::with_capacity(group.len());
            for new_job in group {
                let mut record = JobRecord::new(new_job.payload, new_job.priority)
                    .with_max_attempts(
                        new_job
                            .max_attempts
                            .unwrap_or(self.config.default_max_attempts),
                    );
                if let Some(gate_id) = new_job.parent_id.or_else(|| gate.clone()) {
                    record = record.with_parent(gate_id);
                }
                let stored = self.jobs.insert(record).await?;
                counter!("vodium_queue_jobs_enqueued_total", "kind" => stored.kind().as_str())
                    .increment(1);
                if stored.state == JobState::Ready {
                    self.wake.notify_one();
                } else if stored.state.is_terminal() {
                    self.handler.on_abandoned(&stored).await;
                }
                group_ids.push(stored.id);
            }

            all_ids.extend(group_ids.iter().cloned());
            prev_group = group_ids;
        }

        Ok(all_ids)
    }

    /// Advisory cancellation. Non-active jobs move to `Cancelled` (with the
    /// cascade covering descendants); an `Active` job is not preempted and
    /// `false` is returned.
    pub async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let job = self.jobs.get(id).await?;
        if job.state == JobState::Active || job.state.is_terminal() {
            return Ok(false);
        }
        self.settle(id.clone(), Settle::Cancelled).await?;
        Ok(true)
    }

    /// Scheduler loop. Run on a spawned task; returns after [`shutdown`]
    /// flips the flag.
    pub async fn run(self: Arc<Self>) {
        info!(
            worker_slots = self.config.worker_slots,
            "Starting local job queue"
        );
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if let Err(e) = self.dispatch_ready().await {
                error!("Scheduler dispatch error: {}", e);
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(SCHEDULER_TICK) => {}
            }
        }

        info!("Local job queue scheduler stopped");
    }

    /// Signal shutdown and wait (bounded) for in-flight jobs.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.wake.notify_one();
        info!("Draining local job queue");
        let _ = tokio::time::timeout(self.config.drain_timeout, self.wait_for_idle()).await;
    }

    async fn wait_for_idle(&self) {
        loop {
            if self.slots.available_permits() == self.config.worker_slots {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Start as many ready jobs as free slots allow.
    async fn dispatch_ready(self: &Arc<Self>) -> QueueResult<()> {
        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return Ok(());
            };

            let ready = self.jobs.ready_jobs().await;
            let mut claimed = None;
            for job in ready {
                let Some(kind_sem) = self.kind_slots.get(&job.kind()) else {
                    continue;
                };
                let Ok(kind_permit) = Arc::clone(kind_sem).try_acquire_owned() else {
                    continue;
                };
                if self.jobs.try_mark_active(&job.id).await? {
                    claimed = Some((job.id.clone(), kind_permit));
                    break;
                }
            }

            let Some((job_id, kind_permit)) = claimed else {
                return Ok(());
            };
            let job = self.jobs.get(&job_id).await?;
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.execute_job(job, permit, kind_permit).await;
            });
        }
    }

    async fn execute_job(
        self: Arc<Self>,
        job: JobRecord,
        _permit: OwnedSemaphorePermit,
        _kind_permit: OwnedSemaphorePermit,
    ) {
        debug!(
            job_id = %job.id,
            kind = %job.kind(),
            attempt = job.attempt_count,
            "Executing job"
        );

        let result = self.handler.execute(&job).await;

        match result {
            Ok(()) => {
                counter!("vodium_queue_jobs_completed_total", "kind" => job.kind().as_str())
                    .increment(1);
                if let Err(e) = self.settle(job.id.clone(), Settle::Completed).await {
                    error!(job_id = %job.id, "Failed to record completion: {}", e);
                }
            }
            Err(err) if err.is_retryable() && job.attempt_count < job.max_attempts => {
                let delay = self.config.delay_for_attempt(job.attempt_count);
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    max_attempts = job.max_attempts,
                    "Job failed, retrying in {:?}: {}", delay, err
                );
                counter!("vodium_queue_jobs_retried_total", "kind" => job.kind().as_str())
                    .increment(1);
                self.schedule_retry(job.id.clone(), delay).await;
            }
            Err(err) => {
                error!(job_id = %job.id, "Job failed permanently: {}", err);
                if let Err(e) = self.settle(job.id.clone(), Settle::Failed(err.to_string())).await
                {
                    error!(job_id = %job.id, "Failed to record failure: {}", e);
                }
            }
        }

        self.wake.notify_one();
    }

    /// Park the job, then hand it back to the scheduler after the delay.
    async fn schedule_retry(self: &Arc<Self>, id: JobId, delay: Duration) {
        if let Err(e) = self
            .jobs
            .update(&id, |j| j.state = JobState::Waiting)
            .await
        {
            error!(job_id = %id, "Failed to park job for retry: {}", e);
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let released = queue
                .jobs
                .update(&id, |j| {
                    // a cancellation may have landed while we slept
                    if j.state == JobState::Waiting {
                        j.state = JobState::Ready;
                    }
                })
                .await;
            match released {
                Ok(job) if job.state == JobState::Ready => queue.wake.notify_one(),
                Ok(_) => {}
                Err(e) => error!(job_id = %id, "Failed to release retried job: {}", e),
            }
        });
    }

    /// Apply a terminal outcome and propagate it through the dependency
    /// graph: completions release children and tick barriers, failures and
    /// cancellations poison every dependent descendant.
    async fn settle(&self, id: JobId, outcome: Settle) -> QueueResult<()> {
        let mut work: VecDeque<(JobId, Settle)> = VecDeque::new();
        work.push_back((id, outcome));

        while let Some((id, outcome)) = work.pop_front() {
            let Some(current) = self.jobs.try_get(&id).await else {
                continue;
            };
            if current.state.is_terminal() {
                continue;
            }

            let record = match &outcome {
                Settle::Completed => self.jobs.update(&id, |j| j.mark_completed()).await?,
                Settle::Failed(msg) => {
                    let msg = msg.clone();
                    counter!("vodium_queue_jobs_failed_total", "kind" => current.kind().as_str())
                        .increment(1);
                    self.jobs.update(&id, |j| j.mark_failed(msg)).await?
                }
                Settle::Cancelled => {
                    counter!("vodium_queue_jobs_cancelled_total", "kind" => current.kind().as_str())
                        .increment(1);
                    self.jobs.update(&id, |j| j.mark_cancelled()).await?
                }
            };

            if !matches!(outcome, Settle::Completed) {
                self.handler.on_abandoned(&record).await;
            }

            for child in self.jobs.children_of(&id).await {
                if child.state.is_terminal() {
                    continue;
                }
                match &outcome {
                    Settle::Completed => {
                        if child.state == JobState::WaitingForParent {
                            self.jobs
                                .update(&child.id, |j| j.state = JobState::Ready)
                                .await?;
                            self.wake.notify_one();
                        }
                    }
                    Settle::Failed(_) => {
                        work.push_back((child.id, Settle::Failed("parent job failed".into())));
                    }
                    Settle::Cancelled => {
                        work.push_back((child.id, Settle::Cancelled));
                    }
                }
            }

            for barrier_id in self.jobs.barriers_waiting_on(&id).await {
                match &outcome {
                    Settle::Completed => {
                        if self.jobs.decrement_barrier(&barrier_id).await? == 0 {
                            work.push_back((barrier_id, Settle::Completed));
                        }
                    }
                    Settle::Failed(_) => {
                        work.push_back((barrier_id, Settle::Failed("gating job failed".into())));
                    }
                    Settle::Cancelled => {
                        work.push_back((barrier_id, Settle::Cancelled));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use vodium_models::{
        EncodingSpec, MoveStoragePayload, OptimizePayload, Resolution, TranscodeWebVideoPayload,
        VideoId, BACKGROUND_PRIORITY,
    };
    use vodium_store::MemoryStore;

    #[derive(Default)]
    struct TestHandler {
        executed: Mutex<Vec<JobId>>,
        abandoned: Mutex<Vec<JobId>>,
        /// remaining scripted transient failures per kind
        transient: Mutex<HashMap<JobKind, u32>>,
        terminal: Mutex<HashSet<JobKind>>,
    }

    impl TestHandler {
        fn executed(&self) -> Vec<JobId> {
            self.executed.lock().unwrap().clone()
        }

        fn abandoned(&self) -> Vec<JobId> {
            self.abandoned.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for TestHandler {
        async fn execute(&self, job: &JobRecord) -> Result<(), JobError> {
            self.executed.lock().unwrap().push(job.id.clone());
            if self.terminal.lock().unwrap().contains(&job.kind()) {
                return Err(JobError::terminal("scripted terminal failure"));
            }
            if let Some(n) = self.transient.lock().unwrap().get_mut(&job.kind()) {
                if *n > 0 {
                    *n -= 1;
                    return Err(JobError::transient("scripted transient failure"));
                }
            }
            Ok(())
        }

        async fn on_abandoned(&self, job: &JobRecord) {
            self.abandoned.lock().unwrap().push(job.id.clone());
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(50),
            ..QueueConfig::default()
        }
    }

    fn optimize_payload(video_id: &VideoId) -> JobPayload {
        JobPayload::Optimize(OptimizePayload {
            video_id: video_id.clone(),
            input_path: "/data/source.mp4".to_string(),
            is_new_video: true,
        })
    }

    fn transcode_payload(video_id: &VideoId) -> JobPayload {
        JobPayload::TranscodeWebVideo(TranscodeWebVideoPayload {
            video_id: video_id.clone(),
            spec: EncodingSpec::new(Resolution::R480, 30),
            is_new_video: true,
        })
    }

    fn move_payload(video_id: &VideoId) -> JobPayload {
        JobPayload::MoveToObjectStorage(MoveStoragePayload {
            video_id: video_id.clone(),
            is_new_video: true,
        })
    }

    async fn wait_for_state(queue: &LocalJobQueue, id: &JobId, state: JobState) {
        for _ in 0..400 {
            if queue.jobs().get(id).await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let actual = queue.jobs().get(id).await.unwrap().state;
        panic!("job {} never reached {:?}, stuck at {:?}", id, state, actual);
    }

    #[tokio::test]
    async fn test_child_waits_for_parent_then_runs() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );
        let video_id = VideoId::new();

        let parent = queue
            .enqueue(NewJob::new(optimize_payload(&video_id), 10))
            .await
            .unwrap();
        let child = queue
            .enqueue(NewJob::new(move_payload(&video_id), 10).with_parent(parent.clone()))
            .await
            .unwrap();

        assert_eq!(
            queue.jobs().get(&child).await.unwrap().state,
            JobState::WaitingForParent
        );

        tokio::spawn(Arc::clone(&queue).run());
        wait_for_state(&queue, &child, JobState::Completed).await;

        let executed = handler.executed();
        let parent_pos = executed.iter().position(|id| id == &parent).unwrap();
        let child_pos = executed.iter().position(|id| id == &child).unwrap();
        assert!(parent_pos < child_pos);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_lower_priority_value_runs_first() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let config = QueueConfig {
            worker_slots: 1,
            per_kind_limit: 1,
            ..test_config()
        };
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            config,
        );
        let video_id = VideoId::new();

        let background = queue
            .enqueue(NewJob::new(transcode_payload(&video_id), 5))
            .await
            .unwrap();
        let urgent = queue
            .enqueue(NewJob::new(transcode_payload(&video_id), 3))
            .await
            .unwrap();

        tokio::spawn(Arc::clone(&queue).run());
        wait_for_state(&queue, &background, JobState::Completed).await;
        wait_for_state(&queue, &urgent, JobState::Completed).await;

        let executed = handler.executed();
        assert_eq!(executed[0], urgent);
        assert_eq!(executed[1], background);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_backoff() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        handler
            .transient
            .lock()
            .unwrap()
            .insert(JobKind::Optimize, 1);
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );
        let video_id = VideoId::new();

        let id = queue
            .enqueue(NewJob::new(optimize_payload(&video_id), BACKGROUND_PRIORITY))
            .await
            .unwrap();

        tokio::spawn(Arc::clone(&queue).run());
        wait_for_state(&queue, &id, JobState::Completed).await;

        let job = queue.jobs().get(&id).await.unwrap();
        assert_eq!(job.attempt_count, 2);
        assert_eq!(handler.executed().len(), 2);
        assert!(handler.abandoned().is_empty());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_job_and_descendants() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        handler
            .transient
            .lock()
            .unwrap()
            .insert(JobKind::Optimize, u32::MAX);
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );
        let video_id = VideoId::new();

        let parent = queue
            .enqueue(
                NewJob::new(optimize_payload(&video_id), BACKGROUND_PRIORITY).with_max_attempts(2),
            )
            .await
            .unwrap();
        let child = queue
            .enqueue(
                NewJob::new(move_payload(&video_id), BACKGROUND_PRIORITY)
                    .with_parent(parent.clone()),
            )
            .await
            .unwrap();

        tokio::spawn(Arc::clone(&queue).run());
        wait_for_state(&queue, &parent, JobState::Failed).await;
        wait_for_state(&queue, &child, JobState::Failed).await;

        assert_eq!(handler.executed().len(), 2);
        let abandoned = handler.abandoned();
        assert!(abandoned.contains(&parent));
        assert!(abandoned.contains(&child));

        let child_record = queue.jobs().get(&child).await.unwrap();
        assert_eq!(child_record.error_message.as_deref(), Some("parent job failed"));

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sequential_flow_gates_on_whole_group() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );
        let video_id = VideoId::new();

        let flow = SequentialJobFlow::new()
            .group(vec![NewJob::new(
                optimize_payload(&video_id),
                BACKGROUND_PRIORITY,
            )])
            .group(vec![
                NewJob::new(transcode_payload(&video_id), BACKGROUND_PRIORITY),
                NewJob::new(transcode_payload(&video_id), BACKGROUND_PRIORITY),
            ])
            .group(vec![NewJob::new(
                move_payload(&video_id),
                BACKGROUND_PRIORITY,
            )]);

        let ids = queue.create_sequential_flow(flow).await.unwrap();
        assert_eq!(ids.len(), 4);
        let move_id = ids.last().unwrap().clone();

        tokio::spawn(Arc::clone(&queue).run());
        wait_for_state(&queue, &move_id, JobState::Completed).await;

        // the move job runs only after both encodes of the prior group
        let executed = handler.executed();
        assert_eq!(executed.last().unwrap(), &move_id);
        assert_eq!(executed.len(), 4);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_cascades_to_descendants() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );
        let video_id = VideoId::new();

        let parent = queue
            .enqueue(NewJob::new(optimize_payload(&video_id), BACKGROUND_PRIORITY))
            .await
            .unwrap();
        let child = queue
            .enqueue(
                NewJob::new(move_payload(&video_id), BACKGROUND_PRIORITY)
                    .with_parent(parent.clone()),
            )
            .await
            .unwrap();

        assert!(queue.cancel(&parent).await.unwrap());
        assert_eq!(
            queue.jobs().get(&parent).await.unwrap().state,
            JobState::Cancelled
        );
        assert_eq!(
            queue.jobs().get(&child).await.unwrap().state,
            JobState::Cancelled
        );
        assert!(!queue.cancel(&parent).await.unwrap());
        assert_eq!(handler.abandoned().len(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_payload() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );

        let result = queue
            .enqueue(NewJob::new(
                JobPayload::Optimize(OptimizePayload {
                    video_id: VideoId::new(),
                    input_path: String::new(),
                    is_new_video: true,
                }),
                BACKGROUND_PRIORITY,
            ))
            .await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_internal_barrier_kind() {
        let store = MemoryStore::new();
        let handler = Arc::new(TestHandler::default());
        let queue = LocalJobQueue::new(
            JobRepository::new(store),
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            test_config(),
        );

        let result = queue
            .enqueue(NewJob::new(
                JobPayload::Barrier(BarrierPayload {
                    awaits: vec![JobId::new()],
                }),
                BACKGROUND_PRIORITY,
            ))
            .await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
    }
}
