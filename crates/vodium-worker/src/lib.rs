//! Video processing pipeline for the Vodium backend.
//!
//! This crate provides:
//! - The transcoding job-graph builder (local flows and runner offload)
//! - Local job handlers driving the encoder and storage collaborators
//! - Runner job lifecycle hooks
//! - The video lifecycle state machine
//! - The daemon binary wiring queue, registry and reaper together

pub mod config;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod hooks;
pub mod lifecycle;
pub mod pipeline;

pub use config::WorkerConfig;
pub use encoder::{
    EncoderError, FileCopyEncoder, LocalObjectStorage, MediaEncoder, ObjectStorage,
    ObjectStorageError,
};
pub use error::{WorkerError, WorkerResult};
pub use graph::{AudioMergeSource, OffloadPlan, TranscodingGraphBuilder, TranscodingRequest};
pub use handlers::PipelineJobHandler;
pub use hooks::PipelineRunnerHooks;
pub use lifecycle::{next_state, VideoLifecycle};
pub use pipeline::VideoPipeline;
