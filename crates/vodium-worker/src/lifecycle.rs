//! Video lifecycle state machine.
//!
//! Per-video pending counters gate every advance: a category's state only
//! moves forward when its last outstanding leaf job succeeds, so an
//! incompletely processed video can never be marked published. Failures
//! force the video back to its last stable state and never roll back
//! renditions that already attached.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use vodium_models::{JobCategory, VideoId, VideoState};
use vodium_store::{StoreError, VideoRepository};

use crate::error::WorkerResult;

/// Transition table: where a video goes when the given category drains
/// successfully. Anything not listed stays put.
pub fn next_state(
    current: VideoState,
    category: JobCategory,
    move_to_object_storage: bool,
) -> VideoState {
    match (current, category) {
        (VideoState::ToTranscode, JobCategory::Transcode) => {
            if move_to_object_storage {
                VideoState::ToMoveToObjectStorage
            } else {
                VideoState::Published
            }
        }
        (VideoState::ToMoveToObjectStorage, JobCategory::MoveToObjectStorage) => {
            VideoState::Published
        }
        (VideoState::ToMoveToFileSystem, JobCategory::MoveToFileSystem) => VideoState::Published,
        (VideoState::ToEdit, JobCategory::Edit) => VideoState::ToTranscode,
        (state, _) => state,
    }
}

/// Drives video state from job outcomes.
pub struct VideoLifecycle {
    videos: VideoRepository,
    move_to_object_storage: bool,
}

impl VideoLifecycle {
    pub fn new(videos: VideoRepository, move_to_object_storage: bool) -> Arc<Self> {
        Arc::new(Self {
            videos,
            move_to_object_storage,
        })
    }

    pub fn videos(&self) -> &VideoRepository {
        &self.videos
    }

    /// Register a leaf job against its category counter.
    pub async fn leaf_created(&self, video_id: &VideoId, category: JobCategory) {
        let count = self.videos.increment_pending(video_id, category).await;
        debug!(video_id = %video_id, category = %category, count, "Pending job registered");
    }

    /// Record a leaf success. Exactly one caller observes the counter reach
    /// zero and advances the video. Returns the remaining count.
    pub async fn leaf_succeeded(
        &self,
        video_id: &VideoId,
        category: JobCategory,
        is_new_video: bool,
    ) -> WorkerResult<i64> {
        let remaining = self.videos.decrement_pending(video_id, category).await;
        debug!(video_id = %video_id, category = %category, remaining, "Pending job finished");
        if remaining > 0 {
            return Ok(remaining);
        }

        let move_to_object_storage = self.move_to_object_storage;
        let updated = self
            .videos
            .update(video_id, |v| {
                let next = next_state(v.state, category, move_to_object_storage);
                v.set_state(next);
            })
            .await?;

        if updated.state == VideoState::Published {
            counter!("vodium_videos_published_total").increment(1);
            if is_new_video {
                info!(video_id = %video_id, "New video published");
            } else {
                info!(video_id = %video_id, "Video republished");
            }
        } else {
            debug!(video_id = %video_id, state = %updated.state, "Video advanced");
        }
        Ok(remaining)
    }

    /// Record a leaf failure or cancellation: drain the counter and force
    /// the video back to its last stable state.
    pub async fn leaf_failed(
        &self,
        video_id: &VideoId,
        category: JobCategory,
    ) -> WorkerResult<i64> {
        let remaining = self.videos.decrement_pending(video_id, category).await;
        self.revert(video_id, category).await?;
        Ok(remaining)
    }

    /// A non-leaf pipeline stage failed: the video reverts, the counters
    /// drain through the cascaded leaf failures.
    pub async fn pipeline_failed(
        &self,
        video_id: &VideoId,
        category: JobCategory,
    ) -> WorkerResult<()> {
        self.revert(video_id, category).await
    }

    async fn revert(&self, video_id: &VideoId, category: JobCategory) -> WorkerResult<()> {
        let result = self
            .videos
            .update(video_id, |v| {
                let stable = v.stable_state_after_failure(category);
                v.set_state(stable);
            })
            .await;
        match result {
            Ok(video) => {
                warn!(
                    video_id = %video_id,
                    state = %video.state,
                    "Video forced to last stable state"
                );
                Ok(())
            }
            // deleted mid-flight; nothing left to revert
            Err(StoreError::VideoNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
