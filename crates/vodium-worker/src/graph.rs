//! Transcoding job graph builder.
//!
//! Turns a processing request into a dependent job set: master rendition
//! first, then the per-resolution encodes in parallel, then the storage
//! move when configured. The same shape exists in two flavors: a local
//! sequential flow, and an offload plan whose encodes are runner jobs
//! parented onto a lowest-resolution master.

use vodium_models::{
    job_priority, EncodingSpec, JobPayload, MergeAudioPayload, MoveStoragePayload,
    OptimizePayload, Resolution, TranscodeHlsPayload, TranscodeWebVideoPayload, VideoId,
};
use vodium_queue::{NewJob, SequentialJobFlow};
use vodium_runner::RunnerJobRequest;

use crate::config::WorkerConfig;

/// Audio upload merged with a still preview instead of a video source.
#[derive(Debug, Clone)]
pub struct AudioMergeSource {
    pub audio_path: String,
    pub preview_path: String,
}

/// A request to (re)process a video's renditions.
#[derive(Debug, Clone)]
pub struct TranscodingRequest {
    pub video_id: VideoId,
    pub name: String,
    pub source_path: String,
    /// First processing run for this video
    pub is_new_video: bool,
    /// User-triggered; bumps priority ahead of background work
    pub interactive: bool,
    pub audio_merge: Option<AudioMergeSource>,
}

/// Encodes to run remotely: a master runner job and the children gated on
/// it.
#[derive(Debug, Clone)]
pub struct OffloadPlan {
    pub priority: i32,
    pub master: RunnerJobRequest,
    pub children: Vec<RunnerJobRequest>,
}

/// Builds transcoding job graphs and owns the artifact path layout.
#[derive(Debug, Clone)]
pub struct TranscodingGraphBuilder {
    config: WorkerConfig,
}

impl TranscodingGraphBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn master_path(&self, video_id: &VideoId) -> String {
        format!("{}/{}/master.mp4", self.config.work_dir, video_id)
    }

    pub fn web_video_path(&self, video_id: &VideoId, resolution: Resolution) -> String {
        format!("{}/{}/web-{}.mp4", self.config.work_dir, video_id, resolution)
    }

    pub fn hls_playlist_path(&self, video_id: &VideoId, resolution: Resolution) -> String {
        format!("{}/{}/hls-{}.m3u8", self.config.work_dir, video_id, resolution)
    }

    pub fn edited_path(&self, video_id: &VideoId) -> String {
        format!("{}/{}/edited.mp4", self.config.work_dir, video_id)
    }

    /// Whether web-video renditions are produced. HLS-only deployments
    /// still need one playable family, so this falls back to web video
    /// when both families are switched off.
    fn web_video_enabled(&self) -> bool {
        self.config.web_video_enabled || !self.config.hls_enabled
    }

    /// Local pipeline: [optimize|merge-audio] -> per-resolution encodes ->
    /// [move-to-object-storage].
    pub fn build_local_flow(&self, request: &TranscodingRequest) -> SequentialJobFlow {
        let priority = job_priority(request.interactive);
        let video_id = request.video_id.clone();

        let first = match &request.audio_merge {
            Some(merge) => NewJob::new(
                JobPayload::MergeAudio(MergeAudioPayload {
                    video_id: video_id.clone(),
                    audio_path: merge.audio_path.clone(),
                    preview_path: merge.preview_path.clone(),
                    is_new_video: request.is_new_video,
                }),
                priority,
            ),
            None => NewJob::new(
                JobPayload::Optimize(OptimizePayload {
                    video_id: video_id.clone(),
                    input_path: request.source_path.clone(),
                    is_new_video: request.is_new_video,
                }),
                priority,
            ),
        };

        let web_video = self.web_video_enabled();
        let mut encodes = Vec::new();
        for resolution in &self.config.resolutions {
            let spec = EncodingSpec::new(*resolution, self.config.fps);
            if web_video {
                encodes.push(NewJob::new(
                    JobPayload::TranscodeWebVideo(TranscodeWebVideoPayload {
                        video_id: video_id.clone(),
                        spec,
                        is_new_video: request.is_new_video,
                    }),
                    priority,
                ));
            }
            if self.config.hls_enabled {
                encodes.push(NewJob::new(
                    JobPayload::TranscodeHls(TranscodeHlsPayload {
                        video_id: video_id.clone(),
                        spec,
                        // remux from the web rendition when one exists
                        copy_codecs: web_video,
                        is_new_video: request.is_new_video,
                    }),
                    priority,
                ));
            }
        }

        let mut flow = SequentialJobFlow::new().group(vec![first]).group(encodes);
        if self.config.move_to_object_storage {
            flow = flow.group(vec![NewJob::new(
                JobPayload::MoveToObjectStorage(MoveStoragePayload {
                    video_id,
                    is_new_video: request.is_new_video,
                }),
                priority,
            )]);
        }
        flow
    }

    /// Offloaded pipeline: the lowest resolution becomes the master runner
    /// job, every other encode is its child.
    pub fn build_offload_plan(&self, request: &TranscodingRequest) -> OffloadPlan {
        let priority = job_priority(request.interactive);
        let fps = self.config.fps;
        let mut resolutions = self.config.resolutions.clone();
        resolutions.sort();

        let master_resolution = resolutions.first().copied().unwrap_or(Resolution::R360);
        let master_spec = EncodingSpec::new(master_resolution, fps);

        let master = match &request.audio_merge {
            Some(merge) => RunnerJobRequest::AudioMerge {
                video_id: request.video_id.clone(),
                audio_path: merge.audio_path.clone(),
                preview_path: merge.preview_path.clone(),
                spec: master_spec,
                is_new_video: request.is_new_video,
            },
            None => RunnerJobRequest::WebVideo {
                video_id: request.video_id.clone(),
                source_path: request.source_path.clone(),
                spec: master_spec,
                is_new_video: request.is_new_video,
            },
        };

        let mut children = Vec::new();
        for resolution in resolutions.iter().skip(1) {
            children.push(RunnerJobRequest::WebVideo {
                video_id: request.video_id.clone(),
                source_path: request.source_path.clone(),
                spec: EncodingSpec::new(*resolution, fps),
                is_new_video: request.is_new_video,
            });
        }
        if self.config.hls_enabled {
            for resolution in &resolutions {
                children.push(RunnerJobRequest::Hls {
                    video_id: request.video_id.clone(),
                    source_path: request.source_path.clone(),
                    spec: EncodingSpec::new(*resolution, fps),
                    copy_codecs: true,
                    is_new_video: request.is_new_video,
                });
            }
        }

        OffloadPlan {
            priority,
            master,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodium_models::{JobKind, BACKGROUND_PRIORITY, INTERACTIVE_PRIORITY_OFFSET};

    fn request(interactive: bool) -> TranscodingRequest {
        TranscodingRequest {
            video_id: VideoId::new(),
            name: "clip".to_string(),
            source_path: "/uploads/source.mp4".to_string(),
            is_new_video: true,
            interactive,
            audio_merge: None,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            resolutions: vec![Resolution::R360, Resolution::R720],
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn test_local_flow_shape() {
        let builder = TranscodingGraphBuilder::new(WorkerConfig {
            move_to_object_storage: true,
            ..config()
        });
        let flow = builder.build_local_flow(&request(false));

        let groups = flow.groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0][0].payload.kind(), JobKind::Optimize);
        // two resolutions x (web + hls)
        assert_eq!(groups[1].len(), 4);
        assert_eq!(groups[2][0].payload.kind(), JobKind::MoveToObjectStorage);
    }

    #[test]
    fn test_local_flow_merge_audio_variant() {
        let builder = TranscodingGraphBuilder::new(config());
        let mut req = request(false);
        req.audio_merge = Some(AudioMergeSource {
            audio_path: "/uploads/track.mp3".to_string(),
            preview_path: "/uploads/cover.jpg".to_string(),
        });

        let flow = builder.build_local_flow(&req);
        assert_eq!(flow.groups()[0][0].payload.kind(), JobKind::MergeAudio);
    }

    #[test]
    fn test_interactive_requests_get_priority_offset() {
        let builder = TranscodingGraphBuilder::new(config());
        let background = builder.build_local_flow(&request(false));
        let interactive = builder.build_local_flow(&request(true));

        assert_eq!(background.groups()[0][0].priority, BACKGROUND_PRIORITY);
        assert_eq!(
            interactive.groups()[0][0].priority,
            BACKGROUND_PRIORITY - INTERACTIVE_PRIORITY_OFFSET
        );
    }

    #[test]
    fn test_disabled_families_fall_back_to_web_video() {
        let builder = TranscodingGraphBuilder::new(WorkerConfig {
            web_video_enabled: false,
            hls_enabled: false,
            ..config()
        });
        let flow = builder.build_local_flow(&request(false));
        assert_eq!(flow.groups()[1].len(), 2);
        assert!(flow.groups()[1]
            .iter()
            .all(|j| j.payload.kind() == JobKind::TranscodeWebVideo));
    }

    #[test]
    fn test_offload_plan_masters_lowest_resolution() {
        let builder = TranscodingGraphBuilder::new(config());
        let plan = builder.build_offload_plan(&request(false));

        match &plan.master {
            RunnerJobRequest::WebVideo { spec, .. } => {
                assert_eq!(spec.resolution, Resolution::R360);
            }
            other => panic!("unexpected master: {other:?}"),
        }
        // one remaining web video + hls for both resolutions
        assert_eq!(plan.children.len(), 3);
    }
}
