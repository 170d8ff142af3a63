//! End-to-end pipeline tests over the in-process store: local flows,
//! runner offload with sibling leaf-counting, failure reversion, studio
//! edits and live endings.

use std::sync::Arc;
use std::time::Duration;

use vodium_models::{
    EditTask, FileLocation, JobCategory, Resolution, RunnerJobResult, VideoId, VideoState,
};
use vodium_queue::{JobHandler, LocalJobQueue, QueueConfig};
use vodium_runner::{
    AvailabilityNotifier, ProtocolConfig, RegistryConfig, ResourceSigner, RunnerJobRegistry,
    RunnerManager,
};
use vodium_store::{
    JobRepository, MemoryStore, RunnerJobRepository, RunnerRepository, VideoRepository,
};
use vodium_worker::{
    FileCopyEncoder, LocalObjectStorage, MediaEncoder, ObjectStorage, PipelineJobHandler,
    PipelineRunnerHooks, TranscodingGraphBuilder, TranscodingRequest, VideoLifecycle,
    VideoPipeline, WorkerConfig,
};

struct Harness {
    pipeline: VideoPipeline,
    queue: Arc<LocalJobQueue>,
    manager: Arc<RunnerManager>,
    videos: VideoRepository,
    _tmp: tempfile::TempDir,
}

async fn harness(tweak: impl FnOnce(&mut WorkerConfig)) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut config = WorkerConfig {
        work_dir: tmp.path().join("work").to_string_lossy().into_owned(),
        resolutions: vec![Resolution::R360, Resolution::R720],
        fps: 30,
        web_video_enabled: true,
        hls_enabled: false,
        move_to_object_storage: false,
        offload_transcoding: false,
        resource_secret: "test-secret".to_string(),
        resource_base_url: "https://vodium.example".to_string(),
    };
    tweak(&mut config);

    let store = MemoryStore::new();
    let videos = VideoRepository::new(Arc::clone(&store));
    let lifecycle = VideoLifecycle::new(videos.clone(), config.move_to_object_storage);
    let graph = TranscodingGraphBuilder::new(config.clone());

    let encoder: Arc<dyn MediaEncoder> = Arc::new(FileCopyEncoder);
    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalObjectStorage);

    let handler = PipelineJobHandler::new(
        encoder,
        storage,
        videos.clone(),
        Arc::clone(&lifecycle),
        graph.clone(),
    );
    let queue = LocalJobQueue::new(
        JobRepository::new(Arc::clone(&store)),
        Arc::clone(&handler) as Arc<dyn JobHandler>,
        QueueConfig {
            backoff_base: Duration::from_millis(5),
            ..QueueConfig::default()
        },
    );
    handler.attach_queue(Arc::clone(&queue));

    let hooks = PipelineRunnerHooks::new(
        videos.clone(),
        RunnerJobRepository::new(Arc::clone(&store)),
        Arc::clone(&lifecycle),
        graph.clone(),
        Arc::clone(&queue),
    );
    let registry = RunnerJobRegistry::new(
        RunnerJobRepository::new(Arc::clone(&store)),
        hooks,
        ResourceSigner::new(
            config.resource_secret.as_bytes().to_vec(),
            config.resource_base_url.clone(),
        ),
        AvailabilityNotifier::new(Duration::from_millis(1)),
        RegistryConfig {
            default_max_failures: 1,
            ..RegistryConfig::default()
        },
    );
    let manager = RunnerManager::new(
        RunnerRepository::new(Arc::clone(&store)),
        RunnerJobRepository::new(Arc::clone(&store)),
        Arc::clone(&registry),
        ProtocolConfig::default(),
    );

    let pipeline = VideoPipeline::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        lifecycle,
        graph,
        videos.clone(),
    );

    tokio::spawn(Arc::clone(&queue).run());

    Harness {
        pipeline,
        queue,
        manager,
        videos,
        _tmp: tmp,
    }
}

async fn seed_source(harness: &Harness, name: &str) -> String {
    let path = harness._tmp.path().join(name);
    tokio::fs::write(&path, b"frames").await.expect("seed file");
    path.to_string_lossy().into_owned()
}

fn request(video_id: &VideoId, source: &str) -> TranscodingRequest {
    TranscodingRequest {
        video_id: video_id.clone(),
        name: "clip".to_string(),
        source_path: source.to_string(),
        is_new_video: true,
        interactive: false,
        audio_merge: None,
    }
}

async fn wait_for_video_state(harness: &Harness, id: &VideoId, state: VideoState) {
    for _ in 0..600 {
        if harness.videos.get(id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let actual = harness.videos.get(id).await.unwrap().state;
    panic!("video never reached {state:?}, stuck at {actual:?}");
}

#[tokio::test]
async fn test_local_pipeline_publishes_video() {
    let h = harness(|_| {}).await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();

    wait_for_video_state(&h, &video_id, VideoState::Published).await;

    let video = h.videos.get(&video_id).await.unwrap();
    // two web renditions for the two configured resolutions
    assert_eq!(video.files.len(), 2);
    assert!(video.was_published());

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_local_pipeline_with_storage_move() {
    let h = harness(|c| c.move_to_object_storage = true).await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();

    wait_for_video_state(&h, &video_id, VideoState::Published).await;

    let video = h.videos.get(&video_id).await.unwrap();
    assert!(video
        .files
        .iter()
        .all(|f| f.location == FileLocation::ObjectStorage));
    assert!(video.files.iter().all(|f| f.reference.starts_with("local://")));

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_move_back_to_file_system_republishes() {
    let h = harness(|c| c.move_to_object_storage = true).await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();
    wait_for_video_state(&h, &video_id, VideoState::Published).await;

    h.pipeline
        .request_move_to_file_system(&video_id)
        .await
        .unwrap();
    wait_for_video_state(&h, &video_id, VideoState::Published).await;

    let video = h.videos.get(&video_id).await.unwrap();
    assert!(video
        .files
        .iter()
        .all(|f| f.location == FileLocation::FileSystem));

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_offloaded_siblings_drain_pending_count_exactly_once() {
    let h = harness(|c| {
        c.offload_transcoding = true;
        c.resolutions = vec![Resolution::R360, Resolution::R720, Resolution::R1080];
    })
    .await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();

    // two sibling children (720/1080) gate on the 360 master
    assert_eq!(
        h.videos
            .pending_count(&video_id, JobCategory::Transcode)
            .await,
        2
    );

    let token = h.manager.generate_registration_token().await;
    let runner = h.manager.register(&token.token, "encoder-01").await.unwrap();

    // only the master is claimable up front
    let available = h.manager.list_available(&runner.token, None).await.unwrap();
    assert_eq!(available.len(), 1);
    let master = h
        .manager
        .accept(&runner.token, &available[0].uuid)
        .await
        .unwrap();
    h.manager
        .complete(
            &runner.token,
            &master.job.uuid,
            &master.job_token,
            RunnerJobResult::WebVideoTranscoding {
                output: "uploads/360.mp4".to_string(),
            },
        )
        .await
        .unwrap();

    // master completion promotes the siblings but decrements nothing
    assert_eq!(
        h.videos
            .pending_count(&video_id, JobCategory::Transcode)
            .await,
        2
    );

    let siblings = h.manager.list_available(&runner.token, None).await.unwrap();
    assert_eq!(siblings.len(), 2);

    let first = h
        .manager
        .accept(&runner.token, &siblings[0].uuid)
        .await
        .unwrap();
    h.manager
        .complete(
            &runner.token,
            &first.job.uuid,
            &first.job_token,
            RunnerJobResult::WebVideoTranscoding {
                output: "uploads/720.mp4".to_string(),
            },
        )
        .await
        .unwrap();

    // one sibling down: count drops but the video stays in processing
    assert_eq!(
        h.videos
            .pending_count(&video_id, JobCategory::Transcode)
            .await,
        1
    );
    assert_eq!(
        h.videos.get(&video_id).await.unwrap().state,
        VideoState::ToTranscode
    );

    let second = h
        .manager
        .accept(&runner.token, &siblings[1].uuid)
        .await
        .unwrap();
    h.manager
        .complete(
            &runner.token,
            &second.job.uuid,
            &second.job_token,
            RunnerJobResult::WebVideoTranscoding {
                output: "uploads/1080.mp4".to_string(),
            },
        )
        .await
        .unwrap();

    // the Nth terminal outcome drains the counter and publishes
    assert_eq!(
        h.videos
            .pending_count(&video_id, JobCategory::Transcode)
            .await,
        0
    );
    assert_eq!(
        h.videos.get(&video_id).await.unwrap().state,
        VideoState::Published
    );

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_runner_job_reverts_new_video() {
    let h = harness(|c| {
        c.offload_transcoding = true;
        c.resolutions = vec![Resolution::R360];
    })
    .await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();

    let token = h.manager.generate_registration_token().await;
    let runner = h.manager.register(&token.token, "encoder-01").await.unwrap();
    let available = h.manager.list_available(&runner.token, None).await.unwrap();
    let accepted = h
        .manager
        .accept(&runner.token, &available[0].uuid)
        .await
        .unwrap();

    // failure budget of one: a single error report is terminal
    h.manager
        .error(
            &runner.token,
            &accepted.job.uuid,
            &accepted.job_token,
            "encoder crashed",
        )
        .await
        .unwrap();

    assert_eq!(
        h.videos.get(&video_id).await.unwrap().state,
        VideoState::TranscodingFailed
    );

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_runner_job_keeps_published_video_playable() {
    let h = harness(|c| {
        c.offload_transcoding = true;
        c.resolutions = vec![Resolution::R360];
    })
    .await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.videos
        .load_or_create(video_id.clone(), "clip", VideoState::ToTranscode)
        .await;
    h.videos
        .update(&video_id, |v| v.set_state(VideoState::Published))
        .await
        .unwrap();

    // re-transcode of an already-published video
    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();

    let token = h.manager.generate_registration_token().await;
    let runner = h.manager.register(&token.token, "encoder-01").await.unwrap();
    let available = h.manager.list_available(&runner.token, None).await.unwrap();
    let accepted = h
        .manager
        .accept(&runner.token, &available[0].uuid)
        .await
        .unwrap();
    h.manager
        .error(
            &runner.token,
            &accepted.job.uuid,
            &accepted.job_token,
            "encoder crashed",
        )
        .await
        .unwrap();

    // earlier published output stays servable
    assert_eq!(
        h.videos.get(&video_id).await.unwrap().state,
        VideoState::Published
    );

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_edit_reenters_transcoding_and_republishes() {
    let h = harness(|_| {}).await;
    let video_id = VideoId::new();
    let source = seed_source(&h, "source.mp4").await;

    h.pipeline
        .request_transcoding(request(&video_id, &source))
        .await
        .unwrap();
    wait_for_video_state(&h, &video_id, VideoState::Published).await;
    let files_before = h.videos.get(&video_id).await.unwrap().files.len();

    h.pipeline
        .request_edit(
            &video_id,
            vec![EditTask::Cut {
                start_ms: 0,
                end_ms: 1000,
            }],
            true,
        )
        .await
        .unwrap();

    wait_for_video_state(&h, &video_id, VideoState::Published).await;
    let video = h.videos.get(&video_id).await.unwrap();
    assert!(video.files.len() > files_before);

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_live_ending_with_replay_transcodes_the_recording() {
    let h = harness(|_| {}).await;
    let video_id = VideoId::new();
    let replay = seed_source(&h, "replay.mp4").await;

    h.videos
        .load_or_create(video_id.clone(), "live", VideoState::WaitingForLive)
        .await;

    h.pipeline
        .request_live_ending(&video_id, true, Some(replay))
        .await
        .unwrap();

    wait_for_video_state(&h, &video_id, VideoState::Published).await;

    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_live_ending_without_replay_parks_the_video() {
    let h = harness(|_| {}).await;
    let video_id = VideoId::new();

    h.videos
        .load_or_create(video_id.clone(), "live", VideoState::WaitingForLive)
        .await;

    h.pipeline
        .request_live_ending(&video_id, false, None)
        .await
        .unwrap();

    wait_for_video_state(&h, &video_id, VideoState::LiveEnded).await;

    h.queue.shutdown().await;
}
