//! Vodium processing daemon.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

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

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vodium=info".parse().expect("static directive parses"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vodium-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store = MemoryStore::new();
    let videos = VideoRepository::new(Arc::clone(&store));
    let lifecycle = VideoLifecycle::new(videos.clone(), config.move_to_object_storage);
    let graph = TranscodingGraphBuilder::new(config.clone());

    // external collaborators; pass-through defaults until a real codec and
    // object-storage backend are wired in
    let encoder: Arc<dyn MediaEncoder> = Arc::new(FileCopyEncoder);
    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalObjectStorage);

    let handler = PipelineJobHandler::new(
        Arc::clone(&encoder),
        Arc::clone(&storage),
        videos.clone(),
        Arc::clone(&lifecycle),
        graph.clone(),
    );
    let queue = LocalJobQueue::new(
        JobRepository::new(Arc::clone(&store)),
        Arc::clone(&handler) as Arc<dyn JobHandler>,
        QueueConfig::from_env(),
    );
    handler.attach_queue(Arc::clone(&queue));

    let notifier = AvailabilityNotifier::new(Duration::from_secs(1));
    let hooks = PipelineRunnerHooks::new(
        videos.clone(),
        RunnerJobRepository::new(Arc::clone(&store)),
        Arc::clone(&lifecycle),
        graph.clone(),
        Arc::clone(&queue),
    );
    let signer = ResourceSigner::new(
        config.resource_secret.as_bytes().to_vec(),
        config.resource_base_url.clone(),
    );
    let registry = RunnerJobRegistry::new(
        RunnerJobRepository::new(Arc::clone(&store)),
        hooks,
        signer,
        notifier,
        RegistryConfig::from_env(),
    );
    let manager = RunnerManager::new(
        RunnerRepository::new(Arc::clone(&store)),
        RunnerJobRepository::new(Arc::clone(&store)),
        Arc::clone(&registry),
        ProtocolConfig::from_env(),
    );

    let pipeline = VideoPipeline::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&lifecycle),
        graph,
        videos,
    );

    let queue_task = tokio::spawn(Arc::clone(&queue).run());
    let reaper_task = tokio::spawn(Arc::clone(&manager).run_reaper());

    // terminal jobs are kept for two days of introspection, then dropped
    let purge_jobs = JobRepository::new(Arc::clone(&store));
    let purge_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            purge_jobs.purge_finished(chrono::Duration::days(2)).await;
        }
    });

    // optional smoke-test source for manual runs
    if let Ok(source) = std::env::var("VODIUM_SEED_SOURCE") {
        let request = TranscodingRequest {
            video_id: vodium_models::VideoId::new(),
            name: "seed".to_string(),
            source_path: source,
            is_new_video: true,
            interactive: false,
            audio_merge: None,
        };
        if let Err(e) = pipeline.request_transcoding(request).await {
            error!("Failed to schedule seed transcoding: {}", e);
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    queue.shutdown().await;
    reaper_task.abort();
    purge_task.abort();
    queue_task.abort();

    info!("Worker shutdown complete");
}
