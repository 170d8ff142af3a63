//! Worker configuration.

use vodium_models::Resolution;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory renditions are produced into
    pub work_dir: String,
    /// Transcode targets
    pub resolutions: Vec<Resolution>,
    /// Output frame rate
    pub fps: u32,
    /// Produce plain web-video renditions
    pub web_video_enabled: bool,
    /// Produce HLS renditions
    pub hls_enabled: bool,
    /// Append a move-to-object-storage stage to transcode pipelines
    pub move_to_object_storage: bool,
    /// Offload transcoding to remote runners instead of local workers
    pub offload_transcoding: bool,
    /// Secret for signing runner resource references
    pub resource_secret: String,
    /// Base URL signed resource references resolve against
    pub resource_base_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: "/var/lib/vodium/work".to_string(),
            resolutions: vec![Resolution::R360, Resolution::R720, Resolution::R1080],
            fps: 30,
            web_video_enabled: true,
            hls_enabled: true,
            move_to_object_storage: false,
            offload_transcoding: false,
            resource_secret: "change-me".to_string(),
            resource_base_url: "http://localhost:9000".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("VODIUM_WORK_DIR").unwrap_or(defaults.work_dir),
            resolutions: std::env::var("VODIUM_RESOLUTIONS")
                .ok()
                .map(|s| parse_resolutions(&s))
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.resolutions),
            fps: env_parse("VODIUM_FPS", defaults.fps),
            web_video_enabled: env_bool("VODIUM_WEB_VIDEO", defaults.web_video_enabled),
            hls_enabled: env_bool("VODIUM_HLS", defaults.hls_enabled),
            move_to_object_storage: env_bool(
                "VODIUM_MOVE_TO_OBJECT_STORAGE",
                defaults.move_to_object_storage,
            ),
            offload_transcoding: env_bool(
                "VODIUM_OFFLOAD_TRANSCODING",
                defaults.offload_transcoding,
            ),
            resource_secret: std::env::var("VODIUM_RESOURCE_SECRET")
                .unwrap_or(defaults.resource_secret),
            resource_base_url: std::env::var("VODIUM_RESOURCE_BASE_URL")
                .unwrap_or(defaults.resource_base_url),
        }
    }
}

fn parse_resolutions(raw: &str) -> Vec<Resolution> {
    let mut resolutions: Vec<Resolution> = raw
        .split(',')
        .filter_map(|part| part.trim().parse::<u16>().ok())
        .map(Resolution::from_height)
        .collect();
    resolutions.sort();
    resolutions.dedup();
    resolutions
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
