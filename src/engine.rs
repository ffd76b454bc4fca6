//! Shared handles used by every ingest path.

use std::path::PathBuf;
use std::sync::Arc;

use classcast_av::{AccelerationMode, CapabilityDetector, CommandBuilder, SourceProbe, TranscodeSettings};
use classcast_common::MediaLayout;

use crate::config::Config;
use crate::supervisor::ProcessSupervisor;

/// Cheap-to-clone bundle of the engine's collaborators.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<Config>,
    pub layout: MediaLayout,
    pub supervisor: ProcessSupervisor,
    pub detector: Arc<CapabilityDetector>,
    pub probe: SourceProbe,
    pub builder: CommandBuilder,
    pub settings: TranscodeSettings,
    pub ffmpeg: PathBuf,
}

impl Engine {
    pub fn from_config(config: Config) -> Self {
        let ffmpeg = config
            .tools
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let ffprobe = config
            .tools
            .ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe"));

        let detector = match config.transcode.hw_accel.forced() {
            Some(mode) => CapabilityDetector::fixed(mode),
            None => CapabilityDetector::default(),
        };

        Self {
            layout: MediaLayout::new(config.storage.videos_dir.clone()),
            supervisor: ProcessSupervisor::new(config.transcode.stop_grace()),
            detector: Arc::new(detector),
            probe: SourceProbe::new(ffprobe).with_timeout(config.transcode.probe_timeout()),
            builder: CommandBuilder::new(ffmpeg.clone()),
            settings: config.transcode.settings(),
            ffmpeg,
            config: Arc::new(config),
        }
    }

    /// Acceleration mode for this process, detected on first use.
    pub async fn accel(&self) -> AccelerationMode {
        self.detector.detect().await
    }
}
