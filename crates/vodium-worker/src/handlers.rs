//! Local job handlers.
//!
//! One exhaustive match over the job payload; each arm drives the encoder
//! or storage collaborator and the video lifecycle. Abandoned jobs clean
//! up their conventional outputs and settle the lifecycle counters so a
//! failed pipeline drains instead of wedging its video.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::warn;

use vodium_models::{
    EditVideoPayload, JobCategory, JobPayload, JobRecord, LiveEndingPayload, MergeAudioPayload,
    MoveStoragePayload, OptimizePayload, RenditionFormat, TranscodeHlsPayload,
    TranscodeWebVideoPayload, VideoFile, VideoId, FileLocation, VideoRecord, VideoState,
};
use vodium_queue::{JobError, JobHandler, JobLogger, LocalJobQueue};
use vodium_store::VideoRepository;

use crate::encoder::{EncoderError, MediaEncoder, ObjectStorage};
use crate::graph::{TranscodingGraphBuilder, TranscodingRequest};
use crate::lifecycle::VideoLifecycle;
use crate::pipeline::submit_local_flow;

/// Executes local pipeline jobs.
pub struct PipelineJobHandler {
    encoder: Arc<dyn MediaEncoder>,
    storage: Arc<dyn ObjectStorage>,
    videos: VideoRepository,
    lifecycle: Arc<VideoLifecycle>,
    graph: TranscodingGraphBuilder,
    /// Set after the queue exists; handlers enqueue follow-on segments.
    queue: OnceLock<Arc<LocalJobQueue>>,
}

impl PipelineJobHandler {
    pub fn new(
        encoder: Arc<dyn MediaEncoder>,
        storage: Arc<dyn ObjectStorage>,
        videos: VideoRepository,
        lifecycle: Arc<VideoLifecycle>,
        graph: TranscodingGraphBuilder,
    ) -> Arc<Self> {
        Arc::new(Self {
            encoder,
            storage,
            videos,
            lifecycle,
            graph,
            queue: OnceLock::new(),
        })
    }

    /// Wire the queue in after construction (queue and handler reference
    /// each other).
    pub fn attach_queue(&self, queue: Arc<LocalJobQueue>) {
        let _ = self.queue.set(queue);
    }

    fn queue(&self) -> Result<&Arc<LocalJobQueue>, JobError> {
        self.queue
            .get()
            .ok_or_else(|| JobError::terminal("job queue not attached"))
    }

    /// A job whose video was deleted mid-flight fails terminally, which
    /// cascades over its dependents and runs their cleanup.
    async fn require_video(&self, video_id: &VideoId) -> Result<VideoRecord, JobError> {
        self.videos
            .try_get(video_id)
            .await
            .ok_or_else(|| JobError::terminal("owning video no longer exists"))
    }

    async fn handle_optimize(
        &self,
        job: &JobRecord,
        payload: &OptimizePayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        self.require_video(&payload.video_id).await?;

        logger.log_start("producing master rendition");
        let output = self.graph.master_path(&payload.video_id);
        self.encoder
            .optimize(&payload.input_path, &output)
            .await
            .map_err(classify)?;
        logger.log_completion("master rendition ready");
        Ok(())
    }

    async fn handle_merge_audio(
        &self,
        job: &JobRecord,
        payload: &MergeAudioPayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        self.require_video(&payload.video_id).await?;

        logger.log_start("merging audio with preview image");
        let output = self.graph.master_path(&payload.video_id);
        self.encoder
            .merge_audio(&payload.audio_path, &payload.preview_path, &output)
            .await
            .map_err(classify)?;
        logger.log_completion("master rendition ready");
        Ok(())
    }

    async fn handle_web_video(
        &self,
        job: &JobRecord,
        payload: &TranscodeWebVideoPayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        self.require_video(&payload.video_id).await?;

        let input = self.graph.master_path(&payload.video_id);
        let output = self
            .graph
            .web_video_path(&payload.video_id, payload.spec.resolution);
        logger.log_start(payload.spec.resolution.label());
        self.encoder
            .transcode(&input, &payload.spec, &output)
            .await
            .map_err(classify)?;

        self.videos
            .update(&payload.video_id, |v| {
                v.add_file(VideoFile::new(
                    payload.spec.resolution,
                    RenditionFormat::WebVideo,
                    output.clone(),
                ))
            })
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        self.lifecycle
            .leaf_succeeded(&payload.video_id, JobCategory::Transcode, payload.is_new_video)
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        logger.log_completion(payload.spec.resolution.label());
        Ok(())
    }

    async fn handle_hls(
        &self,
        job: &JobRecord,
        payload: &TranscodeHlsPayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        self.require_video(&payload.video_id).await?;

        let input = self.graph.master_path(&payload.video_id);
        let output = self
            .graph
            .hls_playlist_path(&payload.video_id, payload.spec.resolution);
        logger.log_start(payload.spec.resolution.label());
        self.encoder
            .transcode_hls(&input, &payload.spec, payload.copy_codecs, &output)
            .await
            .map_err(classify)?;

        self.videos
            .update(&payload.video_id, |v| {
                v.add_file(VideoFile::new(
                    payload.spec.resolution,
                    RenditionFormat::Hls,
                    output.clone(),
                ))
            })
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        self.lifecycle
            .leaf_succeeded(&payload.video_id, JobCategory::Transcode, payload.is_new_video)
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        logger.log_completion(payload.spec.resolution.label());
        Ok(())
    }

    async fn handle_move_to_object_storage(
        &self,
        job: &JobRecord,
        payload: &MoveStoragePayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        let video = self.require_video(&payload.video_id).await?;

        for file in video
            .files
            .iter()
            .filter(|f| f.location == FileLocation::FileSystem)
        {
            let remote = self
                .storage
                .store(&file.reference)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            let local_ref = file.reference.clone();
            self.videos
                .update(&payload.video_id, |v| {
                    if let Some(f) = v.files.iter_mut().find(|f| f.reference == local_ref) {
                        f.location = FileLocation::ObjectStorage;
                        f.reference = remote.clone();
                    }
                })
                .await
                .map_err(|e| JobError::terminal(e.to_string()))?;
            logger.log_progress(&local_ref);
        }

        self.lifecycle
            .leaf_succeeded(
                &payload.video_id,
                JobCategory::MoveToObjectStorage,
                payload.is_new_video,
            )
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        logger.log_completion("renditions moved to object storage");
        Ok(())
    }

    async fn handle_move_to_file_system(
        &self,
        job: &JobRecord,
        payload: &MoveStoragePayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        self.require_video(&payload.video_id).await?;

        self.videos
            .update(&payload.video_id, |v| {
                for f in v.files.iter_mut() {
                    f.location = FileLocation::FileSystem;
                }
            })
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;

        self.lifecycle
            .leaf_succeeded(
                &payload.video_id,
                JobCategory::MoveToFileSystem,
                payload.is_new_video,
            )
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        logger.log_completion("renditions moved back to the file system");
        Ok(())
    }

    async fn handle_edit(
        &self,
        job: &JobRecord,
        payload: &EditVideoPayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        let video = self.require_video(&payload.video_id).await?;

        let input = self.graph.master_path(&payload.video_id);
        let output = self.graph.edited_path(&payload.video_id);
        logger.log_start("applying studio edits");
        self.encoder
            .apply_edits(&input, &payload.tasks, &output)
            .await
            .map_err(classify)?;

        // advances ToEdit -> ToTranscode
        self.lifecycle
            .leaf_succeeded(&payload.video_id, JobCategory::Edit, false)
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;

        let request = TranscodingRequest {
            video_id: payload.video_id.clone(),
            name: video.name,
            source_path: output,
            is_new_video: false,
            interactive: true,
            audio_merge: None,
        };
        submit_local_flow(self.queue()?, &self.lifecycle, &self.graph, &request)
            .await
            .map_err(|e| JobError::terminal(e.to_string()))?;
        logger.log_completion("edited source re-entered the transcode pipeline");
        Ok(())
    }

    async fn handle_live_ending(
        &self,
        job: &JobRecord,
        payload: &LiveEndingPayload,
    ) -> Result<(), JobError> {
        let logger = JobLogger::new(&job.id, job.kind());
        let video = self.require_video(&payload.video_id).await?;

        match (&payload.replay_path, payload.replay) {
            (Some(replay_path), true) => {
                self.videos
                    .update(&payload.video_id, |v| v.set_state(VideoState::ToTranscode))
                    .await
                    .map_err(|e| JobError::terminal(e.to_string()))?;
                let request = TranscodingRequest {
                    video_id: payload.video_id.clone(),
                    name: video.name,
                    source_path: replay_path.clone(),
                    is_new_video: false,
                    interactive: false,
                    audio_merge: None,
                };
                submit_local_flow(self.queue()?, &self.lifecycle, &self.graph, &request)
                    .await
                    .map_err(|e| JobError::terminal(e.to_string()))?;
                logger.log_completion("replay entered the transcode pipeline");
            }
            _ => {
                self.videos
                    .update(&payload.video_id, |v| v.set_state(VideoState::LiveEnded))
                    .await
                    .map_err(|e| JobError::terminal(e.to_string()))?;
                logger.log_completion("live session ended without replay");
            }
        }
        Ok(())
    }

    async fn remove_output(&self, path: &str) {
        if tokio::fs::remove_file(path).await.is_ok() {
            warn!(path, "Removed partial output of abandoned job");
        }
    }
}

fn classify(err: EncoderError) -> JobError {
    if err.is_transient() {
        JobError::transient(err.to_string())
    } else {
        JobError::terminal(err.to_string())
    }
}

#[async_trait]
impl JobHandler for PipelineJobHandler {
    async fn execute(&self, job: &JobRecord) -> Result<(), JobError> {
        match &job.payload {
            JobPayload::Optimize(p) => self.handle_optimize(job, p).await,
            JobPayload::MergeAudio(p) => self.handle_merge_audio(job, p).await,
            JobPayload::TranscodeWebVideo(p) => self.handle_web_video(job, p).await,
            JobPayload::TranscodeHls(p) => self.handle_hls(job, p).await,
            JobPayload::MoveToObjectStorage(p) => {
                self.handle_move_to_object_storage(job, p).await
            }
            JobPayload::MoveToFileSystem(p) => self.handle_move_to_file_system(job, p).await,
            JobPayload::EditVideo(p) => self.handle_edit(job, p).await,
            JobPayload::LiveEnding(p) => self.handle_live_ending(job, p).await,
            // barriers settle from predecessor outcomes, never on a worker
            JobPayload::Barrier(_) => Ok(()),
        }
    }

    async fn on_abandoned(&self, job: &JobRecord) {
        let settled = match &job.payload {
            JobPayload::TranscodeWebVideo(p) => {
                self.remove_output(&self.graph.web_video_path(&p.video_id, p.spec.resolution))
                    .await;
                self.lifecycle
                    .leaf_failed(&p.video_id, JobCategory::Transcode)
                    .await
                    .map(|_| ())
            }
            JobPayload::TranscodeHls(p) => {
                self.remove_output(&self.graph.hls_playlist_path(&p.video_id, p.spec.resolution))
                    .await;
                self.lifecycle
                    .leaf_failed(&p.video_id, JobCategory::Transcode)
                    .await
                    .map(|_| ())
            }
            JobPayload::MoveToObjectStorage(p) => self
                .lifecycle
                .leaf_failed(&p.video_id, JobCategory::MoveToObjectStorage)
                .await
                .map(|_| ()),
            JobPayload::MoveToFileSystem(p) => self
                .lifecycle
                .leaf_failed(&p.video_id, JobCategory::MoveToFileSystem)
                .await
                .map(|_| ()),
            JobPayload::EditVideo(p) => {
                self.remove_output(&self.graph.edited_path(&p.video_id)).await;
                self.lifecycle
                    .leaf_failed(&p.video_id, JobCategory::Edit)
                    .await
                    .map(|_| ())
            }
            JobPayload::Optimize(p) => {
                self.remove_output(&self.graph.master_path(&p.video_id)).await;
                self.lifecycle
                    .pipeline_failed(&p.video_id, JobCategory::Transcode)
                    .await
            }
            JobPayload::MergeAudio(p) => {
                self.remove_output(&self.graph.master_path(&p.video_id)).await;
                self.lifecycle
                    .pipeline_failed(&p.video_id, JobCategory::Transcode)
                    .await
            }
            JobPayload::LiveEnding(p) => self
                .lifecycle
                .pipeline_failed(&p.video_id, JobCategory::Live)
                .await,
            JobPayload::Barrier(_) => Ok(()),
        };

        if let Err(e) = settled {
            warn!(job_id = %job.id, "Failed to settle abandoned job: {}", e);
        }
    }
}
