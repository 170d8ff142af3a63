//! Pipeline entry points the presentation layer drives.

use std::sync::Arc;

use tracing::info;

use vodium_models::{
    job_priority, EditTask, EditVideoPayload, JobCategory, JobId, JobKind, JobPayload,
    LiveEndingPayload, MoveStoragePayload, RunnerJobId, VideoId, VideoState,
    BACKGROUND_PRIORITY,
};
use vodium_queue::{LocalJobQueue, NewJob};
use vodium_runner::{NewRunnerJob, RunnerJobRegistry};
use vodium_store::VideoRepository;

use crate::error::{WorkerError, WorkerResult};
use crate::graph::{TranscodingGraphBuilder, TranscodingRequest};
use crate::lifecycle::VideoLifecycle;

/// Persist a local transcoding flow and register its leaves against the
/// pending counters.
pub(crate) async fn submit_local_flow(
    queue: &LocalJobQueue,
    lifecycle: &VideoLifecycle,
    graph: &TranscodingGraphBuilder,
    request: &TranscodingRequest,
) -> WorkerResult<Vec<JobId>> {
    let flow = graph.build_local_flow(request);

    for job in flow.groups().iter().flatten() {
        match job.payload.kind() {
            JobKind::TranscodeWebVideo | JobKind::TranscodeHls => {
                lifecycle
                    .leaf_created(&request.video_id, JobCategory::Transcode)
                    .await;
            }
            JobKind::MoveToObjectStorage => {
                lifecycle
                    .leaf_created(&request.video_id, JobCategory::MoveToObjectStorage)
                    .await;
            }
            JobKind::MoveToFileSystem => {
                lifecycle
                    .leaf_created(&request.video_id, JobCategory::MoveToFileSystem)
                    .await;
            }
            _ => {}
        }
    }

    Ok(queue.create_sequential_flow(flow).await?)
}

/// Create the offloaded job set: a master runner job plus children gated
/// on it. Only leaves count against the pending counters.
pub(crate) async fn submit_offloaded(
    registry: &RunnerJobRegistry,
    lifecycle: &VideoLifecycle,
    graph: &TranscodingGraphBuilder,
    request: &TranscodingRequest,
) -> WorkerResult<Vec<RunnerJobId>> {
    let plan = graph.build_offload_plan(request);
    let master_is_leaf = plan.children.is_empty();

    let master = registry
        .create(NewRunnerJob::new(plan.master, plan.priority))
        .await?;
    if master_is_leaf {
        lifecycle
            .leaf_created(&request.video_id, JobCategory::Transcode)
            .await;
    }

    let mut ids = vec![master.uuid.clone()];
    for child in plan.children {
        let record = registry
            .create(NewRunnerJob::new(child, plan.priority).with_parent(master.uuid.clone()))
            .await?;
        lifecycle
            .leaf_created(&request.video_id, JobCategory::Transcode)
            .await;
        ids.push(record.uuid);
    }
    Ok(ids)
}

/// The processing facade: turns presentation-layer requests into job
/// graphs over the local queue or the runner registry.
pub struct VideoPipeline {
    queue: Arc<LocalJobQueue>,
    registry: Arc<RunnerJobRegistry>,
    lifecycle: Arc<VideoLifecycle>,
    graph: TranscodingGraphBuilder,
    videos: VideoRepository,
}

impl VideoPipeline {
    pub fn new(
        queue: Arc<LocalJobQueue>,
        registry: Arc<RunnerJobRegistry>,
        lifecycle: Arc<VideoLifecycle>,
        graph: TranscodingGraphBuilder,
        videos: VideoRepository,
    ) -> Self {
        Self {
            queue,
            registry,
            lifecycle,
            graph,
            videos,
        }
    }

    /// Kick off (re)processing of a video's renditions.
    pub async fn request_transcoding(&self, request: TranscodingRequest) -> WorkerResult<()> {
        self.videos
            .load_or_create(
                request.video_id.clone(),
                request.name.clone(),
                VideoState::ToTranscode,
            )
            .await;
        self.videos
            .update(&request.video_id, |v| v.set_state(VideoState::ToTranscode))
            .await?;

        if self.graph.config().offload_transcoding {
            let ids =
                submit_offloaded(&self.registry, &self.lifecycle, &self.graph, &request).await?;
            info!(
                video_id = %request.video_id,
                jobs = ids.len(),
                "Transcoding offloaded to runners"
            );
        } else {
            let ids =
                submit_local_flow(&self.queue, &self.lifecycle, &self.graph, &request).await?;
            info!(
                video_id = %request.video_id,
                jobs = ids.len(),
                "Transcoding scheduled locally"
            );
        }
        Ok(())
    }

    /// Apply studio-edit tasks; the edited source re-enters transcoding.
    pub async fn request_edit(
        &self,
        video_id: &VideoId,
        tasks: Vec<EditTask>,
        interactive: bool,
    ) -> WorkerResult<JobId> {
        if self.videos.try_get(video_id).await.is_none() {
            return Err(WorkerError::VideoNotFound(video_id.to_string()));
        }
        self.videos
            .update(video_id, |v| v.set_state(VideoState::ToEdit))
            .await?;

        self.lifecycle
            .leaf_created(video_id, JobCategory::Edit)
            .await;
        let id = self
            .queue
            .enqueue(NewJob::new(
                JobPayload::EditVideo(EditVideoPayload {
                    video_id: video_id.clone(),
                    tasks,
                }),
                job_priority(interactive),
            ))
            .await?;
        Ok(id)
    }

    /// Bring renditions back from object storage onto the local file
    /// system.
    pub async fn request_move_to_file_system(&self, video_id: &VideoId) -> WorkerResult<JobId> {
        if self.videos.try_get(video_id).await.is_none() {
            return Err(WorkerError::VideoNotFound(video_id.to_string()));
        }
        self.videos
            .update(video_id, |v| v.set_state(VideoState::ToMoveToFileSystem))
            .await?;

        self.lifecycle
            .leaf_created(video_id, JobCategory::MoveToFileSystem)
            .await;
        let id = self
            .queue
            .enqueue(NewJob::new(
                JobPayload::MoveToFileSystem(MoveStoragePayload {
                    video_id: video_id.clone(),
                    is_new_video: false,
                }),
                BACKGROUND_PRIORITY,
            ))
            .await?;
        Ok(id)
    }

    /// Tear down a finished live session, optionally keeping the replay.
    pub async fn request_live_ending(
        &self,
        video_id: &VideoId,
        replay: bool,
        replay_path: Option<String>,
    ) -> WorkerResult<JobId> {
        if self.videos.try_get(video_id).await.is_none() {
            return Err(WorkerError::VideoNotFound(video_id.to_string()));
        }
        let id = self
            .queue
            .enqueue(NewJob::new(
                JobPayload::LiveEnding(LiveEndingPayload {
                    video_id: video_id.clone(),
                    replay,
                    replay_path,
                }),
                BACKGROUND_PRIORITY,
            ))
            .await?;
        Ok(id)
    }

    pub fn videos(&self) -> &VideoRepository {
        &self.videos
    }

    pub fn queue(&self) -> &Arc<LocalJobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<RunnerJobRegistry> {
        &self.registry
    }
}
