//! External collaborator seams: the media encoder and object storage.
//!
//! Codec work and upload mechanics live outside this system; the pipeline
//! only sees these traits. The file-copy encoder and local storage below
//! are the pass-through defaults the daemon wires when no real backend is
//! configured, and double as test doubles.

use async_trait::async_trait;
use thiserror::Error;

use vodium_models::{EditTask, EncodingSpec};

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Encoder failed: {0}")]
    Failed(String),

    #[error("Encoder busy: {0}")]
    Busy(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

impl EncoderError {
    /// Busy encoders are worth another attempt; malformed input is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, EncoderError::Busy(_) | EncoderError::Failed(_))
    }
}

/// Opaque media encoder: `(inputs, spec) -> output file | error`.
#[async_trait]
pub trait MediaEncoder: Send + Sync + 'static {
    /// Produce the web-compatible master rendition from an uploaded source.
    async fn optimize(&self, input: &str, output: &str) -> Result<(), EncoderError>;

    /// Merge an audio track with a still preview into a video master.
    async fn merge_audio(
        &self,
        audio: &str,
        preview: &str,
        output: &str,
    ) -> Result<(), EncoderError>;

    /// Produce one web-video rendition per the spec.
    async fn transcode(
        &self,
        input: &str,
        spec: &EncodingSpec,
        output: &str,
    ) -> Result<(), EncoderError>;

    /// Produce one HLS rendition (playlist plus segments).
    async fn transcode_hls(
        &self,
        input: &str,
        spec: &EncodingSpec,
        copy_codecs: bool,
        output: &str,
    ) -> Result<(), EncoderError>;

    /// Apply studio-edit tasks in order, producing a new source file.
    async fn apply_edits(
        &self,
        input: &str,
        tasks: &[EditTask],
        output: &str,
    ) -> Result<(), EncoderError>;
}

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),
}

/// Opaque object storage: `store(path) -> remote reference`.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn store(&self, path: &str) -> Result<String, ObjectStorageError>;

    async fn delete(&self, remote_ref: &str) -> Result<(), ObjectStorageError>;
}

/// Pass-through encoder: every operation copies its input to the output
/// path. Lets the pipeline run end to end without a codec backend.
#[derive(Debug, Default, Clone)]
pub struct FileCopyEncoder;

impl FileCopyEncoder {
    async fn copy(&self, input: &str, output: &str) -> Result<(), EncoderError> {
        if let Some(parent) = std::path::Path::new(output).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EncoderError::Failed(e.to_string()))?;
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| EncoderError::MalformedInput(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MediaEncoder for FileCopyEncoder {
    async fn optimize(&self, input: &str, output: &str) -> Result<(), EncoderError> {
        self.copy(input, output).await
    }

    async fn merge_audio(
        &self,
        audio: &str,
        _preview: &str,
        output: &str,
    ) -> Result<(), EncoderError> {
        self.copy(audio, output).await
    }

    async fn transcode(
        &self,
        input: &str,
        _spec: &EncodingSpec,
        output: &str,
    ) -> Result<(), EncoderError> {
        self.copy(input, output).await
    }

    async fn transcode_hls(
        &self,
        input: &str,
        _spec: &EncodingSpec,
        _copy_codecs: bool,
        output: &str,
    ) -> Result<(), EncoderError> {
        self.copy(input, output).await
    }

    async fn apply_edits(
        &self,
        input: &str,
        _tasks: &[EditTask],
        output: &str,
    ) -> Result<(), EncoderError> {
        self.copy(input, output).await
    }
}

/// "Object storage" that leaves files where they are and hands back a
/// pseudo remote reference.
#[derive(Debug, Default, Clone)]
pub struct LocalObjectStorage;

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn store(&self, path: &str) -> Result<String, ObjectStorageError> {
        Ok(format!("local://{}", path.trim_start_matches('/')))
    }

    async fn delete(&self, _remote_ref: &str) -> Result<(), ObjectStorageError> {
        Ok(())
    }
}
