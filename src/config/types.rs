use classcast_av::{AccelerationMode, TranscodeSettings, VideoSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub helper: HelperConfig,

    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root of the published media tree (courses, live sessions, previews)
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("/var/lib/classcast/videos")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            videos_dir: default_videos_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

/// Which acceleration path to use: detect at startup or force one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccelPreference {
    #[default]
    Auto,
    None,
    Vaapi,
    Nvidia,
}

impl HwAccelPreference {
    /// The forced mode, or `None` when detection should decide.
    pub fn forced(&self) -> Option<AccelerationMode> {
        match self {
            Self::Auto => None,
            Self::None => Some(AccelerationMode::None),
            Self::Vaapi => Some(AccelerationMode::Vaapi),
            Self::Nvidia => Some(AccelerationMode::Nvidia),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub hw_accel: HwAccelPreference,

    #[serde(default = "default_vaapi_device")]
    pub vaapi_device: PathBuf,

    /// Concurrent batch conversions; match the number of usable encoder contexts
    #[serde(default = "default_encoder_slots")]
    pub encoder_slots: usize,

    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    #[serde(default = "default_live_preset")]
    pub live_preset: String,

    #[serde(default = "default_vod_preset")]
    pub vod_preset: String,

    /// Grace period between SIGTERM and SIGKILL when stopping a session
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_vaapi_device() -> PathBuf {
    PathBuf::from(classcast_av::accel::DEFAULT_VAAPI_DEVICE)
}
fn default_encoder_slots() -> usize {
    1
}
fn default_segment_seconds() -> u32 {
    2
}
fn default_live_preset() -> String {
    "veryfast".to_string()
}
fn default_vod_preset() -> String {
    "fast".to_string()
}
fn default_stop_grace() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    30
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            hw_accel: HwAccelPreference::default(),
            vaapi_device: default_vaapi_device(),
            encoder_slots: default_encoder_slots(),
            segment_seconds: default_segment_seconds(),
            live_preset: default_live_preset(),
            vod_preset: default_vod_preset(),
            stop_grace_secs: default_stop_grace(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl TranscodeConfig {
    pub fn settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            live_preset: self.live_preset.clone(),
            vod_preset: self.vod_preset.clone(),
            segment_seconds: self.segment_seconds,
            vaapi_device: self.vaapi_device.clone(),
            ..TranscodeSettings::default()
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    /// Base URL handed to OBS clients
    #[serde(default = "default_rtmp_public_base")]
    pub rtmp_public_base: String,

    /// Base URL the transcoder pulls from
    #[serde(default = "default_rtmp_ingest_base")]
    pub rtmp_ingest_base: String,

    /// Geometry assumed for sources that cannot be probed
    #[serde(default = "default_live_width")]
    pub default_width: u32,

    #[serde(default = "default_live_height")]
    pub default_height: u32,

    #[serde(default = "default_live_fps")]
    pub default_fps: u32,
}

fn default_rtmp_public_base() -> String {
    "rtmp://localhost:1935/live".to_string()
}
fn default_rtmp_ingest_base() -> String {
    "rtmp://localhost:1935/live".to_string()
}
fn default_live_width() -> u32 {
    1280
}
fn default_live_height() -> u32 {
    720
}
fn default_live_fps() -> u32 {
    30
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            rtmp_public_base: default_rtmp_public_base(),
            rtmp_ingest_base: default_rtmp_ingest_base(),
            default_width: default_live_width(),
            default_height: default_live_height(),
            default_fps: default_live_fps(),
        }
    }
}

impl LiveConfig {
    pub fn default_settings(&self) -> VideoSettings {
        VideoSettings {
            width: self.default_width,
            height: self.default_height,
            fps: self.default_fps,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperConfig {
    /// WebRTC negotiation helper executable
    #[serde(default = "default_helper_program")]
    pub program: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    /// Text on the helper's stderr announcing a written descriptor
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    #[serde(default = "default_negotiate_timeout")]
    pub negotiate_timeout_secs: u64,

    /// Consecutive restarts allowed before negotiations fail outright
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_helper_program() -> PathBuf {
    PathBuf::from("pion-server")
}
fn default_ready_marker() -> String {
    "descriptor ready:".to_string()
}
fn default_negotiate_timeout() -> u64 {
    15
}
fn default_max_restarts() -> u32 {
    3
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_helper_program(),
            args: Vec::new(),
            ready_marker: default_ready_marker(),
            negotiate_timeout_secs: default_negotiate_timeout(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl HelperConfig {
    pub fn negotiate_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiate_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_preview_grace")]
    pub stop_grace_secs: u64,
}

fn default_poll_interval() -> u64 {
    100
}
fn default_max_attempts() -> u32 {
    300
}
fn default_preview_grace() -> u64 {
    1
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            stop_grace_secs: default_preview_grace(),
        }
    }
}

impl PreviewConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}
