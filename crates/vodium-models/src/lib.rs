//! Shared data models for the Vodium processing backend.
//!
//! This crate provides Serde-serializable types for:
//! - Local jobs: payloads, states, priorities
//! - Offloadable runner jobs: public/private payloads, claim state
//! - Runners and registration tokens
//! - Videos and their lifecycle states

pub mod encoding;
pub mod ids;
pub mod job;
pub mod runner;
pub mod runner_job;
pub mod video;

// Re-export common types
pub use encoding::{EncodingSpec, Resolution, MAX_FPS};
pub use ids::{JobId, RunnerId, RunnerJobId, VideoId};
pub use job::{
    job_priority, BarrierPayload, EditTask, EditVideoPayload, JobKind, JobPayload, JobRecord,
    JobState, LiveEndingPayload, MergeAudioPayload, MoveStoragePayload, OptimizePayload,
    TranscodeHlsPayload, TranscodeWebVideoPayload, BACKGROUND_PRIORITY,
    INTERACTIVE_PRIORITY_OFFSET,
};
pub use runner::{RegistrationToken, Runner};
pub use runner_job::{
    AudioMergeTranscodingPayload, EditTranscodingPayload, HlsTranscodingPayload,
    ParseRunnerJobKindError, RunnerJobKind, RunnerJobPayload, RunnerJobPrivatePayload,
    RunnerJobRecord, RunnerJobResult, RunnerJobState, SignedFileRef,
    WebVideoTranscodingPayload,
};
pub use video::{
    FileLocation, JobCategory, RenditionFormat, VideoFile, VideoRecord, VideoState,
};
