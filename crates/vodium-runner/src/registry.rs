//! Runner job registry.
//!
//! One capability set per offloadable kind: create, update, complete,
//! error, cancel, abort. The registry owns every state transition and
//! rotates the job token atomically with each exit from `Processing`;
//! domain side effects (artifact attachment, video lifecycle, follow-on
//! jobs) live behind [`RunnerJobHooks`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tracing::{debug, error, info, warn};
use validator::Validate;

use vodium_models::{
    AudioMergeTranscodingPayload, EditTask, EditTranscodingPayload, EncodingSpec,
    HlsTranscodingPayload, RunnerJobId, RunnerJobPayload, RunnerJobPrivatePayload,
    RunnerJobRecord, RunnerJobResult, RunnerJobState, VideoId, WebVideoTranscodingPayload,
};
use vodium_store::RunnerJobRepository;

use crate::error::{RunnerError, RunnerResult};
use crate::notifier::AvailabilityNotifier;
use crate::token::{generate_job_token, ResourceSigner, DEFAULT_RESOURCE_TTL_SECS};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Validity window of signed input references
    pub resource_ttl: Duration,
    /// Failure budget for jobs that don't override it
    pub default_max_failures: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            resource_ttl: Duration::from_secs(DEFAULT_RESOURCE_TTL_SECS),
            default_max_failures: 5,
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            resource_ttl: Duration::from_secs(
                std::env::var("RUNNER_RESOURCE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.resource_ttl.as_secs()),
            ),
            default_max_failures: std::env::var("RUNNER_MAX_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_failures),
        }
    }
}

/// What a completion hook observed about the owning video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Side effects applied
    Done,
    /// The owning video was deleted mid-flight; the registry force-cancels
    /// the job's dependents and cleanup has already run
    VideoMissing,
}

/// Domain side effects of runner job outcomes, implemented by the
/// processing pipeline.
#[async_trait]
pub trait RunnerJobHooks: Send + Sync + 'static {
    /// Apply a successful result: attach the produced artifact, advance the
    /// video lifecycle, possibly enqueue the next chain segment.
    async fn on_completed(
        &self,
        job: &RunnerJobRecord,
        result: &RunnerJobResult,
    ) -> RunnerResult<HookOutcome>;

    /// Failure budget exhausted: remove partial artifacts and force the
    /// owning video back to its last stable state.
    async fn on_errored(&self, job: &RunnerJobRecord);

    /// Administrative cancellation; same cleanup path as exhaustion.
    async fn on_cancelled(&self, job: &RunnerJobRecord);
}

/// Kind-specific inputs for creating a runner job. The registry turns
/// these into the public payload (signed references only) and the private
/// payload (raw server-side context).
#[derive(Debug, Clone)]
pub enum RunnerJobRequest {
    WebVideo {
        video_id: VideoId,
        source_path: String,
        spec: EncodingSpec,
        is_new_video: bool,
    },
    Hls {
        video_id: VideoId,
        source_path: String,
        spec: EncodingSpec,
        copy_codecs: bool,
        is_new_video: bool,
    },
    AudioMerge {
        video_id: VideoId,
        audio_path: String,
        preview_path: String,
        spec: EncodingSpec,
        is_new_video: bool,
    },
    Edit {
        video_id: VideoId,
        source_path: String,
        tasks: Vec<EditTask>,
    },
}

/// A runner job to be created.
#[derive(Debug, Clone)]
pub struct NewRunnerJob {
    pub request: RunnerJobRequest,
    pub priority: i32,
    /// Gate on an already-persisted runner job
    pub parent: Option<RunnerJobId>,
    /// Override the registry's default failure budget
    pub max_failures: Option<u32>,
}

impl NewRunnerJob {
    pub fn new(request: RunnerJobRequest, priority: i32) -> Self {
        Self {
            request,
            priority,
            parent: None,
            max_failures: None,
        }
    }

    pub fn with_parent(mut self, parent: RunnerJobId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = Some(max_failures);
        self
    }
}

/// Outcome of an atomic gate-and-transition step.
enum Gate {
    Applied(RunnerJobRecord),
    AlreadyTerminal(RunnerJobState),
    WrongState(RunnerJobState),
    BadToken,
}

/// Outcome of an atomic error-report step.
enum ErrorGate {
    Requeued(RunnerJobRecord),
    Errored(RunnerJobRecord),
    WrongState(RunnerJobState),
    BadToken,
}

/// The runner job registry.
pub struct RunnerJobRegistry {
    jobs: RunnerJobRepository,
    hooks: Arc<dyn RunnerJobHooks>,
    signer: ResourceSigner,
    notifier: Arc<AvailabilityNotifier>,
    config: RegistryConfig,
}

impl RunnerJobRegistry {
    pub fn new(
        jobs: RunnerJobRepository,
        hooks: Arc<dyn RunnerJobHooks>,
        signer: ResourceSigner,
        notifier: Arc<AvailabilityNotifier>,
        config: RegistryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            hooks,
            signer,
            notifier,
            config,
        })
    }

    pub fn jobs(&self) -> &RunnerJobRepository {
        &self.jobs
    }

    pub fn notifier(&self) -> &Arc<AvailabilityNotifier> {
        &self.notifier
    }

    /// Persist a runner job. The public payload carries signed, time-scoped
    /// references only; the private half never leaves the server.
    pub async fn create(&self, new: NewRunnerJob) -> RunnerResult<RunnerJobRecord> {
        let (payload, private) = self.build_payloads(&new.request)?;

        let mut record = RunnerJobRecord::new(payload, private, new.priority).with_max_failures(
            new.max_failures.unwrap_or(self.config.default_max_failures),
        );
        if let Some(parent) = new.parent {
            record = record.with_parent(parent);
        }

        let stored = self.jobs.insert(record).await?;
        counter!("vodium_runner_jobs_created_total", "kind" => stored.kind.as_str()).increment(1);
        info!(
            uuid = %stored.uuid,
            kind = %stored.kind,
            state = %stored.state,
            "Created runner job"
        );

        if stored.state == RunnerJobState::Pending {
            self.notifier.signal();
        } else if stored.state == RunnerJobState::Cancelled {
            // parent already off the success path; the job arrived dead
            self.hooks.on_cancelled(&stored).await;
        }
        Ok(stored)
    }

    fn build_payloads(
        &self,
        request: &RunnerJobRequest,
    ) -> RunnerResult<(RunnerJobPayload, RunnerJobPrivatePayload)> {
        let ttl = self.config.resource_ttl;
        match request {
            RunnerJobRequest::WebVideo {
                video_id,
                source_path,
                spec,
                is_new_video,
            } => {
                require_path(source_path, "source_path")?;
                validate_spec(spec)?;
                Ok((
                    RunnerJobPayload::WebVideoTranscoding(WebVideoTranscodingPayload {
                        input: self.signer.sign(source_path, ttl),
                        spec: *spec,
                    }),
                    RunnerJobPrivatePayload {
                        video_id: video_id.clone(),
                        source_path: source_path.clone(),
                        is_new_video: *is_new_video,
                    },
                ))
            }
            RunnerJobRequest::Hls {
                video_id,
                source_path,
                spec,
                copy_codecs,
                is_new_video,
            } => {
                require_path(source_path, "source_path")?;
                validate_spec(spec)?;
                Ok((
                    RunnerJobPayload::HlsTranscoding(HlsTranscodingPayload {
                        input: self.signer.sign(source_path, ttl),
                        spec: *spec,
                        copy_codecs: *copy_codecs,
                    }),
                    RunnerJobPrivatePayload {
                        video_id: video_id.clone(),
                        source_path: source_path.clone(),
                        is_new_video: *is_new_video,
                    },
                ))
            }
            RunnerJobRequest::AudioMerge {
                video_id,
                audio_path,
                preview_path,
                spec,
                is_new_video,
            } => {
                require_path(audio_path, "audio_path")?;
                require_path(preview_path, "preview_path")?;
                validate_spec(spec)?;
                Ok((
                    RunnerJobPayload::AudioMergeTranscoding(AudioMergeTranscodingPayload {
                        audio_input: self.signer.sign(audio_path, ttl),
                        preview_input: self.signer.sign(preview_path, ttl),
                        spec: *spec,
                    }),
                    RunnerJobPrivatePayload {
                        video_id: video_id.clone(),
                        source_path: audio_path.clone(),
                        is_new_video: *is_new_video,
                    },
                ))
            }
            RunnerJobRequest::Edit {
                video_id,
                source_path,
                tasks,
            } => {
                require_path(source_path, "source_path")?;
                if tasks.is_empty() {
                    return Err(RunnerError::validation("edit request carries no tasks"));
                }
                Ok((
                    RunnerJobPayload::EditTranscoding(EditTranscodingPayload {
                        input: self.signer.sign(source_path, ttl),
                        tasks: tasks.clone(),
                    }),
                    RunnerJobPrivatePayload {
                        video_id: video_id.clone(),
                        source_path: source_path.clone(),
                        is_new_video: false,
                    },
                ))
            }
        }
    }

    /// Apply a successful result. Idempotent: side effects run only on the
    /// `Processing -> Completed` edge; repeating the call against the
    /// already-completed job is a benign no-op.
    pub async fn complete(
        &self,
        uuid: &RunnerJobId,
        job_token: &str,
        result: RunnerJobResult,
    ) -> RunnerResult<()> {
        let job = self.jobs.get(uuid).await?;
        if result.kind() != job.kind {
            return Err(RunnerError::validation(format!(
                "result payload is {}, job is {}",
                result.kind(),
                job.kind
            )));
        }
        result.validate().map_err(RunnerError::Validation)?;

        let token = job_token.to_string();
        let gate = self
            .jobs
            .update_with(uuid, move |j| {
                if j.state.is_terminal() {
                    return Gate::AlreadyTerminal(j.state);
                }
                if j.state != RunnerJobState::Processing {
                    return Gate::WrongState(j.state);
                }
                if j.job_token.as_deref() != Some(token.as_str()) {
                    return Gate::BadToken;
                }
                j.state = RunnerJobState::Completed;
                j.job_token = None;
                j.lease_expires_at = None;
                j.progress = Some(100);
                j.finished_at = Some(Utc::now());
                Gate::Applied(j.clone())
            })
            .await?;

        match gate {
            Gate::AlreadyTerminal(RunnerJobState::Completed) => {
                debug!(uuid = %uuid, "Repeat completion ignored");
                Ok(())
            }
            Gate::AlreadyTerminal(state) | Gate::WrongState(state) => {
                Err(RunnerError::invalid_state("processing", state))
            }
            Gate::BadToken => Err(RunnerError::StaleToken),
            Gate::Applied(record) => {
                counter!("vodium_runner_jobs_completed_total", "kind" => record.kind.as_str())
                    .increment(1);
                info!(uuid = %uuid, kind = %record.kind, "Runner job completed");

                match self.hooks.on_completed(&record, &result).await {
                    Ok(HookOutcome::Done) => self.promote_children(uuid).await,
                    Ok(HookOutcome::VideoMissing) => {
                        warn!(
                            uuid = %uuid,
                            "Owning video deleted mid-processing, cancelling dependent jobs"
                        );
                        self.cancel_subtree(uuid).await
                    }
                    Err(e) => {
                        error!(uuid = %uuid, "Completion hook failed: {}", e);
                        let errored = self
                            .jobs
                            .update_with(uuid, |j| {
                                j.state = RunnerJobState::Errored;
                                j.error_message = Some("completion processing failed".to_string());
                                j.clone()
                            })
                            .await?;
                        self.hooks.on_errored(&errored).await;
                        self.cancel_subtree(uuid).await?;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Record a runner-reported failure: requeue with a fresh token while
    /// budget remains, transition to `Errored` (with cleanup and video
    /// reversion through the hooks) once it is exhausted.
    pub async fn error(
        &self,
        uuid: &RunnerJobId,
        job_token: &str,
        message: &str,
    ) -> RunnerResult<()> {
        let token = job_token.to_string();
        let msg = message.to_string();
        let gate = self
            .jobs
            .update_with(uuid, move |j| {
                if j.state != RunnerJobState::Processing {
                    return ErrorGate::WrongState(j.state);
                }
                if j.job_token.as_deref() != Some(token.as_str()) {
                    return ErrorGate::BadToken;
                }
                j.failures += 1;
                j.error_message = Some(msg);
                if j.failures < j.max_failures {
                    j.state = RunnerJobState::Pending;
                    j.job_token = Some(generate_job_token());
                    j.runner_id = None;
                    j.lease_expires_at = None;
                    j.progress = None;
                    ErrorGate::Requeued(j.clone())
                } else {
                    j.state = RunnerJobState::Errored;
                    j.job_token = None;
                    j.runner_id = None;
                    j.lease_expires_at = None;
                    j.finished_at = Some(Utc::now());
                    ErrorGate::Errored(j.clone())
                }
            })
            .await?;

        match gate {
            ErrorGate::Requeued(record) => {
                warn!(
                    uuid = %uuid,
                    failures = record.failures,
                    max_failures = record.max_failures,
                    "Runner job failed, requeued: {}", message
                );
                counter!("vodium_runner_jobs_requeued_total", "kind" => record.kind.as_str())
                    .increment(1);
                self.notifier.signal();
                Ok(())
            }
            ErrorGate::Errored(record) => {
                error!(
                    uuid = %uuid,
                    failures = record.failures,
                    "Runner job errored permanently: {}", message
                );
                counter!("vodium_runner_jobs_errored_total", "kind" => record.kind.as_str())
                    .increment(1);
                self.hooks.on_errored(&record).await;
                self.cancel_subtree(uuid).await
            }
            ErrorGate::WrongState(state) => Err(RunnerError::invalid_state("processing", state)),
            ErrorGate::BadToken => Err(RunnerError::StaleToken),
        }
    }

    /// Administrative cancellation; legal from `Pending`, `Processing` and
    /// `WaitingForParentJob`, idempotent against repeated cancellation.
    pub async fn cancel(&self, uuid: &RunnerJobId) -> RunnerResult<()> {
        let gate = self
            .jobs
            .update_with(uuid, |j| match j.state {
                RunnerJobState::Cancelled => Gate::AlreadyTerminal(j.state),
                RunnerJobState::Completed | RunnerJobState::Errored => Gate::WrongState(j.state),
                _ => {
                    j.state = RunnerJobState::Cancelled;
                    j.job_token = None;
                    j.runner_id = None;
                    j.lease_expires_at = None;
                    j.finished_at = Some(Utc::now());
                    Gate::Applied(j.clone())
                }
            })
            .await?;

        match gate {
            Gate::AlreadyTerminal(_) => Ok(()),
            Gate::WrongState(state) => Err(RunnerError::invalid_state(
                "pending, processing or waiting",
                state,
            )),
            Gate::BadToken => Err(RunnerError::StaleToken),
            Gate::Applied(record) => {
                counter!("vodium_runner_jobs_cancelled_total", "kind" => record.kind.as_str())
                    .increment(1);
                info!(uuid = %uuid, "Runner job cancelled");
                self.hooks.on_cancelled(&record).await;
                self.cancel_subtree(uuid).await
            }
        }
    }

    /// The claim holder voluntarily releases the job. Legal from
    /// `Processing` only; the failure budget is untouched.
    pub async fn abort(&self, uuid: &RunnerJobId, job_token: &str) -> RunnerResult<()> {
        let token = job_token.to_string();
        let gate = self
            .jobs
            .update_with(uuid, move |j| {
                if j.state != RunnerJobState::Processing {
                    return Gate::WrongState(j.state);
                }
                if j.job_token.as_deref() != Some(token.as_str()) {
                    return Gate::BadToken;
                }
                j.state = RunnerJobState::Pending;
                j.job_token = Some(generate_job_token());
                j.runner_id = None;
                j.lease_expires_at = None;
                j.progress = None;
                Gate::Applied(j.clone())
            })
            .await?;

        match gate {
            Gate::Applied(record) => {
                info!(uuid = %uuid, kind = %record.kind, "Runner job aborted by claim holder");
                counter!("vodium_runner_jobs_aborted_total", "kind" => record.kind.as_str())
                    .increment(1);
                self.notifier.signal();
                Ok(())
            }
            Gate::WrongState(state) | Gate::AlreadyTerminal(state) => {
                Err(RunnerError::invalid_state("processing", state))
            }
            Gate::BadToken => Err(RunnerError::StaleToken),
        }
    }

    /// Record progress and renew the lease.
    pub async fn update_progress(
        &self,
        uuid: &RunnerJobId,
        job_token: &str,
        progress: u8,
        lease: Duration,
    ) -> RunnerResult<()> {
        if progress > 100 {
            return Err(RunnerError::validation("progress must be 0-100"));
        }
        let token = job_token.to_string();
        let lease_expires_at = Utc::now()
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let gate = self
            .jobs
            .update_with(uuid, move |j| {
                if j.state != RunnerJobState::Processing {
                    return Gate::WrongState(j.state);
                }
                if j.job_token.as_deref() != Some(token.as_str()) {
                    return Gate::BadToken;
                }
                j.progress = Some(progress);
                j.lease_expires_at = Some(lease_expires_at);
                Gate::Applied(j.clone())
            })
            .await?;

        match gate {
            Gate::Applied(_) => {
                debug!(uuid = %uuid, progress, "Runner job progress");
                Ok(())
            }
            Gate::WrongState(state) | Gate::AlreadyTerminal(state) => {
                Err(RunnerError::invalid_state("processing", state))
            }
            Gate::BadToken => Err(RunnerError::StaleToken),
        }
    }

    /// Reclaim the job if it is `Processing` with a lapsed lease. Internal
    /// resilience path, not a client error: the failure budget is
    /// untouched and the token rotates with the transition.
    pub async fn reclaim_expired(&self, uuid: &RunnerJobId) -> RunnerResult<bool> {
        let now = Utc::now();
        let reclaimed = self
            .jobs
            .update_with(uuid, move |j| {
                let lapsed = j.state == RunnerJobState::Processing
                    && j.lease_expires_at.map(|at| at < now).unwrap_or(false);
                if lapsed {
                    j.state = RunnerJobState::Pending;
                    j.job_token = Some(generate_job_token());
                    j.runner_id = None;
                    j.lease_expires_at = None;
                    j.progress = None;
                }
                lapsed
            })
            .await?;

        if reclaimed {
            warn!(uuid = %uuid, "Lease expired, runner job reclaimed");
            counter!("vodium_runner_jobs_reclaimed_total").increment(1);
            self.notifier.signal();
        }
        Ok(reclaimed)
    }

    /// Promote `WaitingForParentJob` children after a parent completion.
    async fn promote_children(&self, uuid: &RunnerJobId) -> RunnerResult<()> {
        let mut promoted = false;
        for child in self.jobs.children_of(uuid).await {
            if child.state != RunnerJobState::WaitingForParentJob {
                continue;
            }
            self.jobs
                .update_with(&child.uuid, |j| {
                    if j.state == RunnerJobState::WaitingForParentJob {
                        j.state = RunnerJobState::Pending;
                    }
                })
                .await?;
            debug!(uuid = %child.uuid, "Promoted waiting runner job");
            promoted = true;
        }
        if promoted {
            self.notifier.signal();
        }
        Ok(())
    }

    /// Cancel every non-terminal descendant; they can never become
    /// runnable once their ancestor is off the success path.
    async fn cancel_subtree(&self, uuid: &RunnerJobId) -> RunnerResult<()> {
        let mut work: Vec<RunnerJobId> = self
            .jobs
            .children_of(uuid)
            .await
            .into_iter()
            .map(|c| c.uuid)
            .collect();

        while let Some(id) = work.pop() {
            let cancelled = self
                .jobs
                .update_with(&id, |j| {
                    if j.state.is_terminal() {
                        return false;
                    }
                    j.state = RunnerJobState::Cancelled;
                    j.job_token = None;
                    j.runner_id = None;
                    j.lease_expires_at = None;
                    j.finished_at = Some(Utc::now());
                    true
                })
                .await?;

            if cancelled {
                let record = self.jobs.get(&id).await?;
                counter!("vodium_runner_jobs_cancelled_total", "kind" => record.kind.as_str())
                    .increment(1);
                self.hooks.on_cancelled(&record).await;
                for child in self.jobs.children_of(&id).await {
                    work.push(child.uuid);
                }
            }
        }
        Ok(())
    }
}

fn require_path(path: &str, field: &str) -> RunnerResult<()> {
    if path.is_empty() {
        return Err(RunnerError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_spec(spec: &EncodingSpec) -> RunnerResult<()> {
    spec.validate()
        .map_err(|e| RunnerError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use vodium_models::{Resolution, RunnerId, RunnerJobKind};
    use vodium_store::MemoryStore;

    #[derive(Default)]
    struct RecordingHooks {
        completed: Mutex<Vec<RunnerJobId>>,
        errored: Mutex<Vec<RunnerJobId>>,
        cancelled: Mutex<Vec<RunnerJobId>>,
        video_missing: AtomicBool,
    }

    #[async_trait]
    impl RunnerJobHooks for RecordingHooks {
        async fn on_completed(
            &self,
            job: &RunnerJobRecord,
            _result: &RunnerJobResult,
        ) -> RunnerResult<HookOutcome> {
            self.completed.lock().unwrap().push(job.uuid.clone());
            if self.video_missing.load(Ordering::SeqCst) {
                Ok(HookOutcome::VideoMissing)
            } else {
                Ok(HookOutcome::Done)
            }
        }

        async fn on_errored(&self, job: &RunnerJobRecord) {
            self.errored.lock().unwrap().push(job.uuid.clone());
        }

        async fn on_cancelled(&self, job: &RunnerJobRecord) {
            self.cancelled.lock().unwrap().push(job.uuid.clone());
        }
    }

    fn registry_with(hooks: Arc<RecordingHooks>) -> Arc<RunnerJobRegistry> {
        let store = MemoryStore::new();
        RunnerJobRegistry::new(
            RunnerJobRepository::new(store),
            hooks,
            ResourceSigner::new(b"test-secret".to_vec(), "https://vodium.example"),
            AvailabilityNotifier::new(Duration::from_millis(1)),
            RegistryConfig::default(),
        )
    }

    fn web_video_request(video_id: &VideoId) -> RunnerJobRequest {
        RunnerJobRequest::WebVideo {
            video_id: video_id.clone(),
            source_path: "/var/lib/vodium/source.mp4".to_string(),
            spec: EncodingSpec::new(Resolution::R720, 30),
            is_new_video: true,
        }
    }

    fn web_video_result() -> RunnerJobResult {
        RunnerJobResult::WebVideoTranscoding {
            output: "uploads/rendition-720.mp4".to_string(),
        }
    }

    async fn claim(registry: &RunnerJobRegistry, uuid: &RunnerJobId) -> String {
        let token = generate_job_token();
        registry
            .jobs()
            .try_claim(
                uuid,
                &RunnerId::new(),
                token.clone(),
                Utc::now() + chrono::Duration::minutes(2),
            )
            .await
            .unwrap()
            .expect("job should be claimable");
        token
    }

    #[tokio::test]
    async fn test_create_signs_inputs_and_hides_private_payload() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();

        assert_eq!(job.state, RunnerJobState::Pending);
        match &job.payload {
            RunnerJobPayload::WebVideoTranscoding(p) => {
                assert!(p.input.url.contains("sig="));
                assert!(!p.input.url.contains("/var/lib"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("/var/lib/vodium/source.mp4"));
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_request() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(hooks);

        let result = registry
            .create(NewRunnerJob::new(
                RunnerJobRequest::WebVideo {
                    video_id: VideoId::new(),
                    source_path: String::new(),
                    spec: EncodingSpec::new(Resolution::R720, 30),
                    is_new_video: false,
                },
                100,
            ))
            .await;
        assert!(matches!(result, Err(RunnerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_child_promoted_when_parent_completes() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let parent = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let child = registry
            .create(
                NewRunnerJob::new(web_video_request(&video_id), 100)
                    .with_parent(parent.uuid.clone()),
            )
            .await
            .unwrap();
        assert_eq!(child.state, RunnerJobState::WaitingForParentJob);

        let token = claim(&registry, &parent.uuid).await;
        registry
            .complete(&parent.uuid, &token, web_video_result())
            .await
            .unwrap();

        let child = registry.jobs().get(&child.uuid).await.unwrap();
        assert_eq!(child.state, RunnerJobState::Pending);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let token = claim(&registry, &job.uuid).await;

        registry
            .complete(&job.uuid, &token, web_video_result())
            .await
            .unwrap();
        // repeat with the previously-valid token: benign no-op
        registry
            .complete(&job.uuid, &token, web_video_result())
            .await
            .unwrap();

        assert_eq!(hooks.completed.lock().unwrap().len(), 1);
        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.state, RunnerJobState::Completed);
        assert!(record.job_token.is_none());
    }

    #[tokio::test]
    async fn test_error_requeues_with_fresh_token_until_exhausted() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100).with_max_failures(2))
            .await
            .unwrap();
        let child = registry
            .create(
                NewRunnerJob::new(web_video_request(&video_id), 100)
                    .with_parent(job.uuid.clone()),
            )
            .await
            .unwrap();

        // first failure: budget remains, back to pending with a new token
        let first_token = claim(&registry, &job.uuid).await;
        registry
            .error(&job.uuid, &first_token, "encoder crashed")
            .await
            .unwrap();

        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.state, RunnerJobState::Pending);
        assert_eq!(record.failures, 1);
        assert!(record.job_token.is_some());
        assert_ne!(record.job_token.as_deref(), Some(first_token.as_str()));
        assert!(record.runner_id.is_none());

        // the dead token is rejected on any later call
        let err = registry
            .complete(&job.uuid, &first_token, web_video_result())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // second failure exhausts the budget
        let second_token = claim(&registry, &job.uuid).await;
        registry
            .error(&job.uuid, &second_token, "encoder crashed again")
            .await
            .unwrap();

        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.state, RunnerJobState::Errored);
        assert!(record.job_token.is_none());
        assert_eq!(hooks.errored.lock().unwrap().len(), 1);

        // the waiting child can never run; it is cancelled with cleanup
        let child = registry.jobs().get(&child.uuid).await.unwrap();
        assert_eq!(child.state, RunnerJobState::Cancelled);
        assert_eq!(hooks.cancelled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_returns_to_pending_without_consuming_budget() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(hooks);
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let token = claim(&registry, &job.uuid).await;

        registry.abort(&job.uuid, &token).await.unwrap();

        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.state, RunnerJobState::Pending);
        assert_eq!(record.failures, 0);
        assert_ne!(record.job_token.as_deref(), Some(token.as_str()));

        // abort is only legal while holding the claim
        let err = registry.abort(&job.uuid, &token).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_conflicts_when_completed() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();

        registry.cancel(&job.uuid).await.unwrap();
        registry.cancel(&job.uuid).await.unwrap();
        assert_eq!(hooks.cancelled.lock().unwrap().len(), 1);

        let done = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let token = claim(&registry, &done.uuid).await;
        registry
            .complete(&done.uuid, &token, web_video_result())
            .await
            .unwrap();
        let err = registry.cancel(&done.uuid).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_deleted_video_cancels_dependents_on_completion() {
        let hooks = Arc::new(RecordingHooks::default());
        hooks.video_missing.store(true, Ordering::SeqCst);
        let registry = registry_with(Arc::clone(&hooks));
        let video_id = VideoId::new();

        let parent = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let child = registry
            .create(
                NewRunnerJob::new(web_video_request(&video_id), 100)
                    .with_parent(parent.uuid.clone()),
            )
            .await
            .unwrap();

        let token = claim(&registry, &parent.uuid).await;
        registry
            .complete(&parent.uuid, &token, web_video_result())
            .await
            .unwrap();

        let child = registry.jobs().get(&child.uuid).await.unwrap();
        assert_eq!(child.state, RunnerJobState::Cancelled);
    }

    #[tokio::test]
    async fn test_result_kind_mismatch_is_rejected_without_transition() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(hooks);
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        assert_eq!(job.kind, RunnerJobKind::WebVideoTranscoding);
        let token = claim(&registry, &job.uuid).await;

        let err = registry
            .complete(
                &job.uuid,
                &token,
                RunnerJobResult::HlsTranscoding {
                    output: "uploads/x.mp4".to_string(),
                    playlist: "uploads/x.m3u8".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Validation(_)));

        // still processing under the same token
        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.state, RunnerJobState::Processing);
        registry
            .complete(&job.uuid, &token, web_video_result())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_progress_renews_lease() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = registry_with(hooks);
        let video_id = VideoId::new();

        let job = registry
            .create(NewRunnerJob::new(web_video_request(&video_id), 100))
            .await
            .unwrap();
        let token = claim(&registry, &job.uuid).await;
        let before = registry
            .jobs()
            .get(&job.uuid)
            .await
            .unwrap()
            .lease_expires_at
            .unwrap();

        registry
            .update_progress(&job.uuid, &token, 40, Duration::from_secs(600))
            .await
            .unwrap();

        let record = registry.jobs().get(&job.uuid).await.unwrap();
        assert_eq!(record.progress, Some(40));
        assert!(record.lease_expires_at.unwrap() > before);
    }
}
