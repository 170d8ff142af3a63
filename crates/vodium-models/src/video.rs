//! Video records and the lifecycle states the pipeline drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Resolution, VideoId};

/// Publication/processing state of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    /// Renditions are being produced
    #[default]
    ToTranscode,
    /// Studio-edit tasks are being applied
    ToEdit,
    /// Renditions are moving to object storage
    ToMoveToObjectStorage,
    /// Renditions are moving back to the local file system
    ToMoveToFileSystem,
    /// Live session scheduled but not started
    WaitingForLive,
    /// Live session over, no replay processing pending
    LiveEnded,
    /// Publicly playable
    Published,
    /// Transcoding failed before any publishable output
    TranscodingFailed,
    /// Storage move failed
    MoveFailed,
    /// Studio edit failed
    EditFailed,
}

impl VideoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::ToTranscode => "to_transcode",
            VideoState::ToEdit => "to_edit",
            VideoState::ToMoveToObjectStorage => "to_move_to_object_storage",
            VideoState::ToMoveToFileSystem => "to_move_to_file_system",
            VideoState::WaitingForLive => "waiting_for_live",
            VideoState::LiveEnded => "live_ended",
            VideoState::Published => "published",
            VideoState::TranscodingFailed => "transcoding_failed",
            VideoState::MoveFailed => "move_failed",
            VideoState::EditFailed => "edit_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            VideoState::TranscodingFailed | VideoState::MoveFailed | VideoState::EditFailed
        )
    }

    /// States in which pipeline jobs for the video are expected to exist.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            VideoState::ToTranscode
                | VideoState::ToEdit
                | VideoState::ToMoveToObjectStorage
                | VideoState::ToMoveToFileSystem
        )
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category a pipeline job counts against in the per-video pending
/// counters. Publication is gated on the relevant counters reaching zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    Transcode,
    MoveToObjectStorage,
    MoveToFileSystem,
    Edit,
    Live,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Transcode => "transcode",
            JobCategory::MoveToObjectStorage => "move_to_object_storage",
            JobCategory::MoveToFileSystem => "move_to_file_system",
            JobCategory::Edit => "edit",
            JobCategory::Live => "live",
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a produced rendition currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLocation {
    FileSystem,
    ObjectStorage,
}

/// Container format of a produced rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenditionFormat {
    WebVideo,
    Hls,
}

/// A playable output attached to a video.
///
/// Renditions are append-only from the lifecycle's point of view: a later
/// sibling failure never removes one that already attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFile {
    pub resolution: Resolution,
    pub format: RenditionFormat,
    pub location: FileLocation,
    /// Path or remote reference, depending on location
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl VideoFile {
    pub fn new(resolution: Resolution, format: RenditionFormat, reference: impl Into<String>) -> Self {
        Self {
            resolution,
            format,
            location: FileLocation::FileSystem,
            reference: reference.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_location(mut self, location: FileLocation) -> Self {
        self.location = location;
        self
    }
}

/// A video persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: VideoId,

    pub name: String,

    #[serde(default)]
    pub state: VideoState,

    /// First publication; once set it is the stable state failures revert to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Produced renditions
    #[serde(default)]
    pub files: Vec<VideoFile>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn new(id: VideoId, name: impl Into<String>, state: VideoState) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            state,
            published_at: None,
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_state(&mut self, state: VideoState) {
        self.state = state;
        self.updated_at = Utc::now();
        if state == VideoState::Published {
            self.published_at.get_or_insert_with(Utc::now);
        }
    }

    pub fn add_file(&mut self, file: VideoFile) {
        self.files.push(file);
        self.updated_at = Utc::now();
    }

    /// Whether this video has ever been publicly playable.
    pub fn was_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// The state a failed pipeline leaves the video in: previously
    /// published videos stay playable, new ones land in the category's
    /// failure state.
    pub fn stable_state_after_failure(&self, category: JobCategory) -> VideoState {
        if self.was_published() {
            return VideoState::Published;
        }
        match category {
            JobCategory::Transcode | JobCategory::Live => VideoState::TranscodingFailed,
            JobCategory::MoveToObjectStorage | JobCategory::MoveToFileSystem => {
                VideoState::MoveFailed
            }
            JobCategory::Edit => VideoState::EditFailed,
        }
    }
}
