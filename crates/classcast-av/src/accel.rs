//! Hardware acceleration detection.
//!
//! Detection looks for a DRM render node first (VAAPI), then asks
//! `nvidia-smi -L` for a GPU. Anything that goes wrong along the way counts
//! as "no acceleration"; detection never fails.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::command::ToolCommand;

/// Default DRM render node used for VAAPI.
pub const DEFAULT_VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Hardware path used for decoding, scaling and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationMode {
    #[default]
    None,
    Vaapi,
    Nvidia,
}

impl AccelerationMode {
    /// Flags that must precede `-i`.
    pub fn input_args(&self, vaapi_device: &Path) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Vaapi => vec![
                "-hwaccel".into(),
                "vaapi".into(),
                "-hwaccel_device".into(),
                vaapi_device.to_string_lossy().into_owned(),
                "-hwaccel_output_format".into(),
                "vaapi".into(),
            ],
            Self::Nvidia => vec![
                "-hwaccel".into(),
                "cuda".into(),
                "-hwaccel_output_format".into(),
                "cuda".into(),
            ],
        }
    }

    /// H.264 encoder matching this mode.
    pub fn video_encoder(&self) -> &'static str {
        match self {
            Self::None => "libx264",
            Self::Vaapi => "h264_vaapi",
            Self::Nvidia => "h264_nvenc",
        }
    }
}

impl std::fmt::Display for AccelerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Vaapi => "vaapi",
            Self::Nvidia => "nvidia",
        })
    }
}

impl FromStr for AccelerationMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "cpu" => Ok(Self::None),
            "vaapi" => Ok(Self::Vaapi),
            "nvidia" | "cuda" | "nvenc" => Ok(Self::Nvidia),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown acceleration mode '{other}'"
            ))),
        }
    }
}

/// Probes the host once and remembers the answer.
#[derive(Debug)]
pub struct CapabilityDetector {
    dri_dir: PathBuf,
    nvidia_smi: PathBuf,
    cached: OnceCell<AccelerationMode>,
}

impl Default for CapabilityDetector {
    fn default() -> Self {
        Self::new("/dev/dri", "nvidia-smi")
    }
}

impl CapabilityDetector {
    pub fn new(dri_dir: impl Into<PathBuf>, nvidia_smi: impl Into<PathBuf>) -> Self {
        Self {
            dri_dir: dri_dir.into(),
            nvidia_smi: nvidia_smi.into(),
            cached: OnceCell::new(),
        }
    }

    /// A detector that always reports `mode`, skipping host probing.
    pub fn fixed(mode: AccelerationMode) -> Self {
        let detector = Self::default();
        let _ = detector.cached.set(mode);
        detector
    }

    /// Detect the acceleration mode. Probes on first call only.
    pub async fn detect(&self) -> AccelerationMode {
        *self
            .cached
            .get_or_init(|| async {
                let mode = self.probe_host().await;
                tracing::info!(mode = %mode, "hardware acceleration detected");
                mode
            })
            .await
    }

    async fn probe_host(&self) -> AccelerationMode {
        if has_render_node(&self.dri_dir) {
            return AccelerationMode::Vaapi;
        }
        if self.nvidia_gpu_listed().await {
            return AccelerationMode::Nvidia;
        }
        AccelerationMode::None
    }

    async fn nvidia_gpu_listed(&self) -> bool {
        let result = ToolCommand::new(self.nvidia_smi.clone())
            .arg("-L")
            .timeout(Duration::from_secs(5))
            .execute()
            .await;
        match result {
            Ok(out) => out.stdout.contains("GPU"),
            Err(e) => {
                tracing::debug!("nvidia-smi unavailable: {e}");
                false
            }
        }
    }
}

fn has_render_node(dri_dir: &Path) -> bool {
    match std::fs::read_dir(dri_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("renderD")),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_node_means_vaapi() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("renderD128"), b"").unwrap();
        let detector = CapabilityDetector::new(dir.path(), "nonexistent_tool_12345");
        assert_eq!(detector.detect().await, AccelerationMode::Vaapi);
    }

    #[tokio::test]
    async fn nothing_found_means_none() {
        let dir = tempfile::tempdir().unwrap();
        let detector = CapabilityDetector::new(dir.path().join("missing"), "nonexistent_tool_12345");
        assert_eq!(detector.detect().await, AccelerationMode::None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nvidia_smi_listing_a_gpu_means_nvidia() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let smi = dir.path().join("nvidia-smi");
        std::fs::write(&smi, "#!/bin/sh\necho 'GPU 0: Tesla T4 (UUID: GPU-1)'\n").unwrap();
        std::fs::set_permissions(&smi, std::fs::Permissions::from_mode(0o755)).unwrap();

        let detector = CapabilityDetector::new(dir.path().join("no-dri"), &smi);
        assert_eq!(detector.detect().await, AccelerationMode::Nvidia);
    }

    #[tokio::test]
    async fn fixed_mode_is_returned() {
        let detector = CapabilityDetector::fixed(AccelerationMode::Nvidia);
        assert_eq!(detector.detect().await, AccelerationMode::Nvidia);
    }

    #[test]
    fn parse_modes() {
        assert_eq!("VAAPI".parse::<AccelerationMode>().unwrap(), AccelerationMode::Vaapi);
        assert_eq!("cuda".parse::<AccelerationMode>().unwrap(), AccelerationMode::Nvidia);
        assert!("quicksync".parse::<AccelerationMode>().is_err());
    }

    #[test]
    fn hwaccel_flags() {
        let dev = Path::new(DEFAULT_VAAPI_DEVICE);
        assert!(AccelerationMode::None.input_args(dev).is_empty());
        let vaapi = AccelerationMode::Vaapi.input_args(dev);
        assert!(vaapi.contains(&DEFAULT_VAAPI_DEVICE.to_string()));
        assert_eq!(
            AccelerationMode::Nvidia.input_args(dev),
            vec!["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]
        );
    }
}
