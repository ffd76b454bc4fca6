//! Source probing via ffprobe.
//!
//! ffprobe is asked for one CSV row per elementary stream:
//!
//! ```text
//! h264,video,1920,1080,30000/1001
//! aac,audio,0/0
//! ```
//!
//! Rows are parsed by content rather than column position, since ffprobe
//! omits fields that do not apply to a stream type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::{Error, Result};

/// Where the transcoder reads its input from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputSource {
    /// A recorded file on disk.
    File(PathBuf),
    /// A network stream such as an RTMP ingest URL.
    Url(String),
    /// An SDP descriptor written to stdin, describing RTP media on UDP.
    Pipe,
}

impl InputSource {
    /// The string passed to `-i`.
    pub fn input_arg(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Url(url) => url.clone(),
            Self::Pipe => "pipe:0".to_string(),
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, Self::Pipe)
    }
}

/// Caller-supplied geometry for sources that cannot be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// A source plus its resolved geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub input: InputSource,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub has_audio: bool,
}

impl SourceDescriptor {
    /// Describe a source from explicit settings. Audio is assumed present.
    pub fn from_settings(input: InputSource, settings: VideoSettings) -> Self {
        Self {
            input,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            has_audio: true,
        }
    }

    pub fn total_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Stream geometry reported by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub has_audio: bool,
}

/// Runs ffprobe against a source.
#[derive(Debug, Clone)]
pub struct SourceProbe {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl SourceProbe {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a file on disk.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, ffprobe fails, or no video stream is
    /// reported.
    pub async fn probe_file(&self, path: &Path) -> Result<SourceDescriptor> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }
        let input = InputSource::File(path.to_path_buf());
        let report = self.probe(&input.input_arg()).await?;
        Ok(describe(input, report))
    }

    /// Probe a live URL, falling back to `defaults` on any failure.
    pub async fn probe_or_default(&self, url: &str, defaults: VideoSettings) -> SourceDescriptor {
        let input = InputSource::Url(url.to_string());
        match self.probe(url).await {
            Ok(report) => describe(input, report),
            Err(e) => {
                tracing::warn!(source = %url, "probe failed, using live defaults: {e}");
                SourceDescriptor::from_settings(input, defaults)
            }
        }
    }

    /// Run ffprobe and parse its stream rows.
    pub async fn probe(&self, source: &str) -> Result<ProbeReport> {
        let output = ToolCommand::new(self.ffprobe.clone())
            .args([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_name,codec_type,width,height,r_frame_rate",
                "-of",
                "csv=p=0",
            ])
            .arg(source)
            .timeout(self.timeout)
            .execute()
            .await?;

        let report = parse_stream_rows(&output.stdout, source)?;
        tracing::debug!(
            source = %source,
            width = report.width,
            height = report.height,
            fps = report.fps,
            has_audio = report.has_audio,
            "probed source"
        );
        Ok(report)
    }
}

fn describe(input: InputSource, report: ProbeReport) -> SourceDescriptor {
    SourceDescriptor {
        input,
        width: report.width,
        height: report.height,
        fps: report.fps,
        has_audio: report.has_audio,
    }
}

/// Parse ffprobe CSV rows. The first video row provides the geometry.
pub fn parse_stream_rows(output: &str, source: &str) -> Result<ProbeReport> {
    let mut video: Option<(u32, u32, u32)> = None;
    let mut has_audio = false;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.contains(&"audio") {
            has_audio = true;
        } else if fields.contains(&"video") && video.is_none() {
            video = Some(parse_video_row(&fields)?);
        }
    }

    let (width, height, fps) = video.ok_or_else(|| Error::NoVideoStream {
        source_ref: source.to_string(),
    })?;

    Ok(ProbeReport {
        width,
        height,
        fps,
        has_audio,
    })
}

fn parse_video_row(fields: &[&str]) -> Result<(u32, u32, u32)> {
    let mut numbers = fields.iter().filter_map(|f| f.parse::<u32>().ok());
    let (width, height) = match (numbers.next(), numbers.next()) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(Error::parse_error(
                "ffprobe",
                format!("no dimensions in row '{}'", fields.join(",")),
            ))
        }
    };
    let fps = fields
        .iter()
        .find(|f| f.contains('/'))
        .and_then(|f| parse_frame_rate(f))
        .ok_or_else(|| {
            Error::parse_error("ffprobe", format!("no frame rate in row '{}'", fields.join(",")))
        })?;
    Ok((width, height, fps))
}

/// Turn `"30000/1001"` into `30`. Returns `None` for zero or malformed rates.
pub fn parse_frame_rate(rational: &str) -> Option<u32> {
    let (num, den) = rational.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    Some((num / den).round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_and_audio_rows() {
        let out = "h264,video,1920,1080,30000/1001\naac,audio,0/0\n";
        let report = parse_stream_rows(out, "in.mp4").unwrap();
        assert_eq!(
            report,
            ProbeReport {
                width: 1920,
                height: 1080,
                fps: 30,
                has_audio: true
            }
        );
    }

    #[test]
    fn no_audio_row_means_silent() {
        let report = parse_stream_rows("h264,video,1280,720,60/1\n", "in.mp4").unwrap();
        assert!(!report.has_audio);
        assert_eq!(report.fps, 60);
    }

    #[test]
    fn first_video_row_wins() {
        let out = "aac,audio,0/0\nh264,video,640,360,25/1\nmjpeg,video,320,240,90000/1\n";
        let report = parse_stream_rows(out, "in.mp4").unwrap();
        assert_eq!((report.width, report.height, report.fps), (640, 360, 25));
        assert!(report.has_audio);
    }

    #[test]
    fn missing_video_row_is_fatal() {
        let err = parse_stream_rows("aac,audio,0/0\n", "talk.m4a").unwrap_err();
        assert!(matches!(err, Error::NoVideoStream { .. }));
        assert!(err.is_probe_failure());
    }

    #[test]
    fn frame_rate_rounding() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30));
        assert_eq!(parse_frame_rate("24000/1001"), Some(24));
        assert_eq!(parse_frame_rate("60/1"), Some(60));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn settings_default_to_720p30_with_audio() {
        let source = SourceDescriptor::from_settings(InputSource::Pipe, VideoSettings::default());
        assert_eq!((source.width, source.height, source.fps), (1280, 720, 30));
        assert!(source.has_audio);
    }

    #[tokio::test]
    async fn probe_missing_file() {
        let probe = SourceProbe::new("ffprobe");
        let err = probe
            .probe_file(Path::new("/nonexistent/lesson.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn probe_or_default_falls_back() {
        let probe = SourceProbe::new("nonexistent_tool_12345");
        let source = probe
            .probe_or_default("rtmp://localhost/live/55_abc", VideoSettings::default())
            .await;
        assert_eq!(source.input, InputSource::Url("rtmp://localhost/live/55_abc".into()));
        assert_eq!((source.width, source.height, source.fps), (1280, 720, 30));
    }
}
