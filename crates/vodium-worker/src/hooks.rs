//! Runner job lifecycle hooks.
//!
//! The registry calls in here on every terminal runner-job outcome. These
//! hooks attach produced artifacts, keep the per-video pending counters
//! honest (leaves only; an intermediate master never decrements), and
//! chain the next pipeline segment once a category drains.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use vodium_models::{
    JobCategory, JobPayload, MoveStoragePayload, RenditionFormat, RunnerJobKind,
    RunnerJobPayload, RunnerJobRecord, RunnerJobResult, VideoFile, VideoState,
};
use vodium_queue::{LocalJobQueue, NewJob};
use vodium_runner::{HookOutcome, RunnerError, RunnerJobHooks, RunnerResult};
use vodium_store::{RunnerJobRepository, VideoRepository};

use crate::graph::{TranscodingGraphBuilder, TranscodingRequest};
use crate::lifecycle::VideoLifecycle;
use crate::pipeline::submit_local_flow;

/// Pipeline-side implementation of the registry hooks.
pub struct PipelineRunnerHooks {
    videos: VideoRepository,
    runner_jobs: RunnerJobRepository,
    lifecycle: Arc<VideoLifecycle>,
    graph: TranscodingGraphBuilder,
    queue: Arc<LocalJobQueue>,
}

impl PipelineRunnerHooks {
    pub fn new(
        videos: VideoRepository,
        runner_jobs: RunnerJobRepository,
        lifecycle: Arc<VideoLifecycle>,
        graph: TranscodingGraphBuilder,
        queue: Arc<LocalJobQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            videos,
            runner_jobs,
            lifecycle,
            graph,
            queue,
        })
    }

    fn category_for(kind: RunnerJobKind) -> JobCategory {
        match kind {
            RunnerJobKind::EditTranscoding => JobCategory::Edit,
            _ => JobCategory::Transcode,
        }
    }

    fn spec_resolution(payload: &RunnerJobPayload) -> vodium_models::Resolution {
        match payload {
            RunnerJobPayload::WebVideoTranscoding(p) => p.spec.resolution,
            RunnerJobPayload::HlsTranscoding(p) => p.spec.resolution,
            RunnerJobPayload::AudioMergeTranscoding(p) => p.spec.resolution,
            RunnerJobPayload::EditTranscoding(_) => vodium_models::Resolution::Audio,
        }
    }

    /// Shared failure/cancellation bookkeeping.
    async fn settle_off_success_path(&self, job: &RunnerJobRecord) {
        let video_id = &job.private_payload.video_id;
        if self.videos.try_get(video_id).await.is_none() {
            return;
        }
        let category = Self::category_for(job.kind);
        let is_leaf = self.runner_jobs.children_of(&job.uuid).await.is_empty();

        let settled = if is_leaf {
            self.lifecycle.leaf_failed(video_id, category).await.map(|_| ())
        } else {
            self.lifecycle.pipeline_failed(video_id, category).await
        };
        if let Err(e) = settled {
            warn!(uuid = %job.uuid, "Failed to settle runner job outcome: {}", e);
        }
    }
}

#[async_trait]
impl RunnerJobHooks for PipelineRunnerHooks {
    async fn on_completed(
        &self,
        job: &RunnerJobRecord,
        result: &RunnerJobResult,
    ) -> RunnerResult<HookOutcome> {
        let video_id = &job.private_payload.video_id;
        let Some(video) = self.videos.try_get(video_id).await else {
            return Ok(HookOutcome::VideoMissing);
        };

        let mut edited_source: Option<String> = None;
        match result {
            RunnerJobResult::WebVideoTranscoding { output }
            | RunnerJobResult::AudioMergeTranscoding { output } => {
                let resolution = Self::spec_resolution(&job.payload);
                let output = output.clone();
                self.videos
                    .update(video_id, |v| {
                        v.add_file(VideoFile::new(
                            resolution,
                            RenditionFormat::WebVideo,
                            output.clone(),
                        ))
                    })
                    .await?;
            }
            RunnerJobResult::HlsTranscoding { playlist, .. } => {
                let resolution = Self::spec_resolution(&job.payload);
                let playlist = playlist.clone();
                self.videos
                    .update(video_id, |v| {
                        v.add_file(VideoFile::new(resolution, RenditionFormat::Hls, playlist.clone()))
                    })
                    .await?;
            }
            RunnerJobResult::EditTranscoding { output } => {
                edited_source = Some(output.clone());
            }
        }

        // leaf rule: only a job without children settles the counter
        if self.runner_jobs.children_of(&job.uuid).await.is_empty() {
            let category = Self::category_for(job.kind);
            let remaining = self
                .lifecycle
                .leaf_succeeded(video_id, category, job.private_payload.is_new_video)
                .await
                .map_err(|e| RunnerError::Hook(e.to_string()))?;

            if remaining == 0 {
                if let Some(source_path) = edited_source {
                    // edited source re-enters the transcode pipeline
                    self.videos
                        .update(video_id, |v| v.set_state(VideoState::ToTranscode))
                        .await?;
                    let request = TranscodingRequest {
                        video_id: video_id.clone(),
                        name: video.name.clone(),
                        source_path,
                        is_new_video: false,
                        interactive: true,
                        audio_merge: None,
                    };
                    submit_local_flow(&self.queue, &self.lifecycle, &self.graph, &request)
                        .await
                        .map_err(|e| RunnerError::Hook(e.to_string()))?;
                    info!(video_id = %video_id, "Edited video re-entered transcoding");
                } else if category == JobCategory::Transcode
                    && self.graph.config().move_to_object_storage
                {
                    // transcoding drained; schedule the storage move stage
                    self.lifecycle
                        .leaf_created(video_id, JobCategory::MoveToObjectStorage)
                        .await;
                    self.queue
                        .enqueue(NewJob::new(
                            JobPayload::MoveToObjectStorage(MoveStoragePayload {
                                video_id: video_id.clone(),
                                is_new_video: job.private_payload.is_new_video,
                            }),
                            job.priority,
                        ))
                        .await
                        .map_err(|e| RunnerError::Hook(e.to_string()))?;
                }
            }
        }

        Ok(HookOutcome::Done)
    }

    async fn on_errored(&self, job: &RunnerJobRecord) {
        self.settle_off_success_path(job).await;
    }

    async fn on_cancelled(&self, job: &RunnerJobRecord) {
        self.settle_off_success_path(job).await;
    }
}
