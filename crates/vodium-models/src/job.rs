//! Local job ledger records and payloads.
//!
//! Job dispatch is a closed set of kinds: every payload variant carries its
//! own typed body and handlers match exhaustively, so adding a kind is a
//! compile-time event rather than a registry lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{EncodingSpec, JobId, VideoId};

/// Default priority for background work. Lower values are more urgent.
pub const BACKGROUND_PRIORITY: i32 = 100;

/// Fixed offset subtracted for interactive (user-triggered) requests so
/// they starve background work of the same kind under load.
pub const INTERACTIVE_PRIORITY_OFFSET: i32 = 80;

fn default_max_attempts() -> u32 {
    3
}

/// Priority value for a request, applying the interactive offset.
pub fn job_priority(interactive: bool) -> i32 {
    if interactive {
        BACKGROUND_PRIORITY - INTERACTIVE_PRIORITY_OFFSET
    } else {
        BACKGROUND_PRIORITY
    }
}

/// Job state in the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Persisted but not yet schedulable
    #[default]
    Waiting,
    /// Gated on a parent job that has not completed
    WaitingForParent,
    /// Eligible for a worker slot
    Ready,
    /// Claimed by a worker slot
    Active,
    /// Finished successfully
    Completed,
    /// Failed permanently (attempts exhausted or terminal error)
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::WaitingForParent => "waiting_for_parent",
            JobState::Ready => "ready",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a local job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Optimize,
    MergeAudio,
    TranscodeWebVideo,
    TranscodeHls,
    MoveToObjectStorage,
    MoveToFileSystem,
    EditVideo,
    LiveEnding,
    /// Internal gate over a group of jobs; never dispatched to a worker.
    Barrier,
}

impl JobKind {
    /// Every kind, for building per-kind scheduling state.
    pub const ALL: [JobKind; 9] = [
        JobKind::Optimize,
        JobKind::MergeAudio,
        JobKind::TranscodeWebVideo,
        JobKind::TranscodeHls,
        JobKind::MoveToObjectStorage,
        JobKind::MoveToFileSystem,
        JobKind::EditVideo,
        JobKind::LiveEnding,
        JobKind::Barrier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Optimize => "optimize",
            JobKind::MergeAudio => "merge_audio",
            JobKind::TranscodeWebVideo => "transcode_web_video",
            JobKind::TranscodeHls => "transcode_hls",
            JobKind::MoveToObjectStorage => "move_to_object_storage",
            JobKind::MoveToFileSystem => "move_to_file_system",
            JobKind::EditVideo => "edit_video",
            JobKind::LiveEnding => "live_ending",
            JobKind::Barrier => "barrier",
        }
    }

    /// Whether a worker slot ever executes this kind.
    pub fn is_executable(&self) -> bool {
        !matches!(self, JobKind::Barrier)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Turn an uploaded source into the web-compatible master rendition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptimizePayload {
    pub video_id: VideoId,
    /// Path of the uploaded source on the processing host
    #[validate(length(min = 1))]
    pub input_path: String,
    /// First processing run for this video (controls publish notification)
    pub is_new_video: bool,
}

/// Merge an audio upload with a still preview into the master rendition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MergeAudioPayload {
    pub video_id: VideoId,
    #[validate(length(min = 1))]
    pub audio_path: String,
    #[validate(length(min = 1))]
    pub preview_path: String,
    pub is_new_video: bool,
}

/// Produce one web-video rendition from the master.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TranscodeWebVideoPayload {
    pub video_id: VideoId,
    #[validate(nested)]
    pub spec: EncodingSpec,
    pub is_new_video: bool,
}

/// Produce one HLS rendition (playlist + segments) from the master.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TranscodeHlsPayload {
    pub video_id: VideoId,
    #[validate(nested)]
    pub spec: EncodingSpec,
    /// Remux the existing streams instead of re-encoding
    pub copy_codecs: bool,
    pub is_new_video: bool,
}

/// Move every produced rendition to its final storage tier.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MoveStoragePayload {
    pub video_id: VideoId,
    pub is_new_video: bool,
}

/// A single studio-edit operation, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum EditTask {
    Cut { start_ms: u64, end_ms: u64 },
    AddIntro { path: String },
    AddOutro { path: String },
    AddWatermark { path: String },
}

/// Apply studio-edit tasks and re-enter the transcode pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EditVideoPayload {
    pub video_id: VideoId,
    #[validate(length(min = 1))]
    pub tasks: Vec<EditTask>,
}

/// Tear down a finished live session, optionally keeping the replay.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LiveEndingPayload {
    pub video_id: VideoId,
    /// Keep the recorded session as a VOD replay
    pub replay: bool,
    /// Recorded session path when a replay is kept
    pub replay_path: Option<String>,
}

/// Internal gate: completes when every awaited job completes, fails when
/// any of them fails. Children of a multi-job group parent onto this.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BarrierPayload {
    #[validate(length(min = 1))]
    pub awaits: Vec<JobId>,
}

/// Typed payload of a local job, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Optimize(OptimizePayload),
    MergeAudio(MergeAudioPayload),
    TranscodeWebVideo(TranscodeWebVideoPayload),
    TranscodeHls(TranscodeHlsPayload),
    MoveToObjectStorage(MoveStoragePayload),
    MoveToFileSystem(MoveStoragePayload),
    EditVideo(EditVideoPayload),
    LiveEnding(LiveEndingPayload),
    Barrier(BarrierPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Optimize(_) => JobKind::Optimize,
            JobPayload::MergeAudio(_) => JobKind::MergeAudio,
            JobPayload::TranscodeWebVideo(_) => JobKind::TranscodeWebVideo,
            JobPayload::TranscodeHls(_) => JobKind::TranscodeHls,
            JobPayload::MoveToObjectStorage(_) => JobKind::MoveToObjectStorage,
            JobPayload::MoveToFileSystem(_) => JobKind::MoveToFileSystem,
            JobPayload::EditVideo(_) => JobKind::EditVideo,
            JobPayload::LiveEnding(_) => JobKind::LiveEnding,
            JobPayload::Barrier(_) => JobKind::Barrier,
        }
    }

    /// Video this job belongs to, if any (barriers have none).
    pub fn video_id(&self) -> Option<&VideoId> {
        match self {
            JobPayload::Optimize(p) => Some(&p.video_id),
            JobPayload::MergeAudio(p) => Some(&p.video_id),
            JobPayload::TranscodeWebVideo(p) => Some(&p.video_id),
            JobPayload::TranscodeHls(p) => Some(&p.video_id),
            JobPayload::MoveToObjectStorage(p) => Some(&p.video_id),
            JobPayload::MoveToFileSystem(p) => Some(&p.video_id),
            JobPayload::EditVideo(p) => Some(&p.video_id),
            JobPayload::LiveEnding(p) => Some(&p.video_id),
            JobPayload::Barrier(_) => None,
        }
    }

    pub fn is_new_video(&self) -> bool {
        match self {
            JobPayload::Optimize(p) => p.is_new_video,
            JobPayload::MergeAudio(p) => p.is_new_video,
            JobPayload::TranscodeWebVideo(p) => p.is_new_video,
            JobPayload::TranscodeHls(p) => p.is_new_video,
            JobPayload::MoveToObjectStorage(p) => p.is_new_video,
            JobPayload::MoveToFileSystem(p) => p.is_new_video,
            _ => false,
        }
    }

    /// Validate the payload shape for its kind.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            JobPayload::Optimize(p) => p.validate(),
            JobPayload::MergeAudio(p) => p.validate(),
            JobPayload::TranscodeWebVideo(p) => p.validate(),
            JobPayload::TranscodeHls(p) => p.validate(),
            JobPayload::MoveToObjectStorage(p) => p.validate(),
            JobPayload::MoveToFileSystem(p) => p.validate(),
            JobPayload::EditVideo(p) => p.validate(),
            JobPayload::LiveEnding(p) => p.validate(),
            JobPayload::Barrier(p) => p.validate(),
        }
    }
}

/// A job persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Typed payload (also determines the kind)
    pub payload: JobPayload,

    /// Scheduling priority; lower values run first
    pub priority: i32,

    /// Current state
    #[serde(default)]
    pub state: JobState,

    /// Parent gating this job, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,

    /// Executions attempted so far
    #[serde(default)]
    pub attempt_count: u32,

    /// Attempts allowed before the job fails permanently
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// First execution timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal state timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new record in `Waiting` state; the queue decides whether it
    /// becomes `Ready` or `WaitingForParent` at enqueue time.
    pub fn new(payload: JobPayload, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            payload,
            priority,
            state: JobState::Waiting,
            parent_id: None,
            attempt_count: 0,
            max_attempts: default_max_attempts(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Gate this job on a parent.
    pub fn with_parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    pub fn video_id(&self) -> Option<&VideoId> {
        self.payload.video_id()
    }

    /// Whether another execution attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_started(&mut self) {
        self.state = JobState::Active;
        self.attempt_count += 1;
        self.started_at.get_or_insert_with(Utc::now);
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.error_message = Some(error.into());
        self.finished_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.finished_at = Some(Utc::now());
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolution;

    fn transcode_payload() -> JobPayload {
        JobPayload::TranscodeWebVideo(TranscodeWebVideoPayload {
            video_id: VideoId::new(),
            spec: EncodingSpec::new(Resolution::R720, 30),
            is_new_video: true,
        })
    }

    #[test]
    fn test_new_job_starts_waiting() {
        let job = JobRecord::new(transcode_payload(), BACKGROUND_PRIORITY);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempt_count, 0);
        assert!(job.can_retry());
    }

    #[test]
    fn test_interactive_priority_is_more_urgent() {
        assert!(job_priority(true) < job_priority(false));
        assert_eq!(
            job_priority(false) - job_priority(true),
            INTERACTIVE_PRIORITY_OFFSET
        );
    }

    #[test]
    fn test_payload_validation_rejects_empty_input() {
        let payload = JobPayload::Optimize(OptimizePayload {
            video_id: VideoId::new(),
            input_path: String::new(),
            is_new_video: true,
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_barrier_is_not_executable() {
        assert!(!JobKind::Barrier.is_executable());
        assert!(JobKind::TranscodeHls.is_executable());
    }

    #[test]
    fn test_state_transitions_track_timestamps() {
        let mut job = JobRecord::new(transcode_payload(), BACKGROUND_PRIORITY);
        job.mark_started();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempt_count, 1);
        assert!(job.started_at.is_some());

        job.mark_completed();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.state.is_terminal());
        assert!(job.finished_at.is_some());
    }
}
