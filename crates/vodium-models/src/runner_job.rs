//! Offloadable runner job records and payloads.
//!
//! A runner job is the remote-claimable form of a processing step. Its
//! public payload only ever references inputs through signed, time-scoped
//! URLs; everything the server needs to resume its own bookkeeping lives in
//! the private payload, which is never serialized into a runner response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EditTask, EncodingSpec, RunnerId, RunnerJobId, VideoId};

fn default_max_failures() -> u32 {
    5
}

/// Runner job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunnerJobState {
    /// Gated on a parent job that has not completed
    WaitingForParentJob,
    /// Claimable by any registered runner
    #[default]
    Pending,
    /// Leased to a runner
    Processing,
    /// Finished successfully
    Completed,
    /// Failure budget exhausted
    Errored,
    /// Administratively cancelled
    Cancelled,
}

impl RunnerJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerJobState::WaitingForParentJob => "waiting_for_parent_job",
            RunnerJobState::Pending => "pending",
            RunnerJobState::Processing => "processing",
            RunnerJobState::Completed => "completed",
            RunnerJobState::Errored => "errored",
            RunnerJobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerJobState::Completed | RunnerJobState::Errored | RunnerJobState::Cancelled
        )
    }
}

impl std::fmt::Display for RunnerJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of an offloadable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerJobKind {
    WebVideoTranscoding,
    HlsTranscoding,
    AudioMergeTranscoding,
    EditTranscoding,
}

impl RunnerJobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerJobKind::WebVideoTranscoding => "web-video-transcoding",
            RunnerJobKind::HlsTranscoding => "hls-transcoding",
            RunnerJobKind::AudioMergeTranscoding => "audio-merge-transcoding",
            RunnerJobKind::EditTranscoding => "edit-transcoding",
        }
    }
}

impl std::fmt::Display for RunnerJobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown runner job kind: {0}")]
pub struct ParseRunnerJobKindError(String);

impl std::str::FromStr for RunnerJobKind {
    type Err = ParseRunnerJobKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web-video-transcoding" => Ok(RunnerJobKind::WebVideoTranscoding),
            "hls-transcoding" => Ok(RunnerJobKind::HlsTranscoding),
            "audio-merge-transcoding" => Ok(RunnerJobKind::AudioMergeTranscoding),
            "edit-transcoding" => Ok(RunnerJobKind::EditTranscoding),
            other => Err(ParseRunnerJobKindError(other.to_string())),
        }
    }
}

/// A signed, time-scoped reference to a server-side resource.
///
/// The only form in which runners ever see an input: no raw paths, no
/// standing access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFileRef {
    /// Fully qualified fetch URL carrying the signature
    pub url: String,
    /// Moment the signature stops validating
    pub expires_at: DateTime<Utc>,
}

/// Public payload for a web-video transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebVideoTranscodingPayload {
    pub input: SignedFileRef,
    pub spec: EncodingSpec,
}

/// Public payload for an HLS transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsTranscodingPayload {
    pub input: SignedFileRef,
    pub spec: EncodingSpec,
    pub copy_codecs: bool,
}

/// Public payload for an audio/preview merge transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMergeTranscodingPayload {
    pub audio_input: SignedFileRef,
    pub preview_input: SignedFileRef,
    pub spec: EncodingSpec,
}

/// Public payload for a studio-edit transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditTranscodingPayload {
    pub input: SignedFileRef,
    pub tasks: Vec<EditTask>,
}

/// Public payload of a runner job, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerJobPayload {
    WebVideoTranscoding(WebVideoTranscodingPayload),
    HlsTranscoding(HlsTranscodingPayload),
    AudioMergeTranscoding(AudioMergeTranscodingPayload),
    EditTranscoding(EditTranscodingPayload),
}

impl RunnerJobPayload {
    pub fn kind(&self) -> RunnerJobKind {
        match self {
            RunnerJobPayload::WebVideoTranscoding(_) => RunnerJobKind::WebVideoTranscoding,
            RunnerJobPayload::HlsTranscoding(_) => RunnerJobKind::HlsTranscoding,
            RunnerJobPayload::AudioMergeTranscoding(_) => RunnerJobKind::AudioMergeTranscoding,
            RunnerJobPayload::EditTranscoding(_) => RunnerJobKind::EditTranscoding,
        }
    }
}

/// Server-side context needed to resume work when a runner reports back.
/// Never serialized into runner-facing responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerJobPrivatePayload {
    pub video_id: VideoId,
    /// Source file the signed input reference resolves to
    pub source_path: String,
    pub is_new_video: bool,
}

/// Result payload a runner submits on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerJobResult {
    WebVideoTranscoding {
        /// Upload reference of the produced rendition
        output: String,
    },
    HlsTranscoding {
        output: String,
        playlist: String,
    },
    AudioMergeTranscoding {
        output: String,
    },
    EditTranscoding {
        output: String,
    },
}

impl RunnerJobResult {
    pub fn kind(&self) -> RunnerJobKind {
        match self {
            RunnerJobResult::WebVideoTranscoding { .. } => RunnerJobKind::WebVideoTranscoding,
            RunnerJobResult::HlsTranscoding { .. } => RunnerJobKind::HlsTranscoding,
            RunnerJobResult::AudioMergeTranscoding { .. } => RunnerJobKind::AudioMergeTranscoding,
            RunnerJobResult::EditTranscoding { .. } => RunnerJobKind::EditTranscoding,
        }
    }

    /// Validate the result shape: output references must be non-empty.
    pub fn validate(&self) -> Result<(), String> {
        let ok = match self {
            RunnerJobResult::WebVideoTranscoding { output } => !output.is_empty(),
            RunnerJobResult::HlsTranscoding { output, playlist } => {
                !output.is_empty() && !playlist.is_empty()
            }
            RunnerJobResult::AudioMergeTranscoding { output } => !output.is_empty(),
            RunnerJobResult::EditTranscoding { output } => !output.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err("result payload references an empty output".to_string())
        }
    }
}

/// A runner job persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerJobRecord {
    /// External id; the only identifier runners see
    pub uuid: RunnerJobId,

    /// Job kind
    pub kind: RunnerJobKind,

    /// Current state
    #[serde(default)]
    pub state: RunnerJobState,

    /// Scheduling priority; lower values are offered first
    pub priority: i32,

    /// Public payload handed to the claiming runner
    pub payload: RunnerJobPayload,

    /// Server-side resume context; never sent to runners
    #[serde(skip_serializing, default)]
    pub private_payload: RunnerJobPrivatePayload,

    /// Single-use secret bound to the current lease generation
    #[serde(skip_serializing, default)]
    pub job_token: Option<String>,

    /// Runner currently holding the lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<RunnerId>,

    /// Lease deadline; no progress update past this reclaims the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Last reported progress (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    /// Runner-reported failures so far
    #[serde(default)]
    pub failures: u32,

    /// Failure budget before the job errors permanently
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Parent runner job gating this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<RunnerJobId>,

    /// Error message (if errored)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// First claim timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal state timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunnerJobRecord {
    /// Create a new record; the registry decides between `Pending` and
    /// `WaitingForParentJob` at create time.
    pub fn new(
        payload: RunnerJobPayload,
        private_payload: RunnerJobPrivatePayload,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: RunnerJobId::new(),
            kind: payload.kind(),
            state: RunnerJobState::Pending,
            priority,
            payload,
            private_payload,
            job_token: None,
            runner_id: None,
            lease_expires_at: None,
            progress: None,
            failures: 0,
            max_failures: default_max_failures(),
            parent_uuid: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Gate this job on a parent runner job.
    pub fn with_parent(mut self, parent_uuid: RunnerJobId) -> Self {
        self.parent_uuid = Some(parent_uuid);
        self.state = RunnerJobState::WaitingForParentJob;
        self
    }

    /// Override the failure budget.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Whether another claim is allowed after a runner-reported failure.
    pub fn has_failure_budget(&self) -> bool {
        self.failures < self.max_failures
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
