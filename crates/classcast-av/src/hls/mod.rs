//! ffmpeg argv construction for ABR HLS output.
//!
//! The generated command writes, relative to its working directory:
//!
//! ```text
//! master.m3u8
//! {W}x{H}@{fps}/stream.m3u8
//! {W}x{H}@{fps}/data%05d.ts
//! original.mp4            (live only)
//! ```
//!
//! Building is pure: nothing is created on disk and nothing is spawned.

pub mod filter;
pub mod preview;

use std::path::PathBuf;

use classcast_common::paths::{MASTER_MANIFEST, RECORDING_FILE, VARIANT_MANIFEST};
use serde::{Deserialize, Serialize};

use crate::accel::{AccelerationMode, DEFAULT_VAAPI_DEVICE};
use crate::ladder::{self, ResolutionProfile};
use crate::probe::{InputSource, SourceDescriptor};
use crate::{Error, Result};

pub use filter::{strategy_for, FilterGraph, FilterGraphStrategy};

/// Protocols a pipe-fed SDP descriptor may reference.
const SDP_PROTOCOL_WHITELIST: &str = "file,pipe,udp,rtp";

/// Encoder knobs that do not depend on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    pub live_preset: String,
    pub vod_preset: String,
    pub segment_seconds: u32,
    pub vaapi_device: PathBuf,
    pub loglevel: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            live_preset: "veryfast".to_string(),
            vod_preset: "fast".to_string(),
            segment_seconds: 2,
            vaapi_device: PathBuf::from(DEFAULT_VAAPI_DEVICE),
            loglevel: "warning".to_string(),
        }
    }
}

impl TranscodeSettings {
    pub fn preset(&self, live: bool) -> &str {
        if live {
            &self.live_preset
        } else {
            &self.vod_preset
        }
    }
}

/// A fully built transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    /// `argv[0]` is the ffmpeg program.
    pub argv: Vec<String>,
    pub ladder: Vec<ResolutionProfile>,
}

impl TranscodeCommand {
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// Shell-ish rendering for logs.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|a| {
                if a.contains(' ') || a.contains(';') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Assembles ffmpeg argv for ABR HLS transcodes.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    ffmpeg: PathBuf,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl CommandBuilder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Plan the ladder for `source` and build the command.
    pub fn build(
        &self,
        source: &SourceDescriptor,
        live: bool,
        accel: AccelerationMode,
        settings: &TranscodeSettings,
    ) -> Result<TranscodeCommand> {
        let ladder = ladder::plan(source.total_pixels(), source.fps);
        self.build_with_ladder(source, ladder, live, accel, settings)
    }

    /// Build the command for an already planned ladder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the ladder is empty, i.e. the
    /// source is smaller than the smallest rendition.
    pub fn build_with_ladder(
        &self,
        source: &SourceDescriptor,
        ladder: Vec<ResolutionProfile>,
        live: bool,
        accel: AccelerationMode,
        settings: &TranscodeSettings,
    ) -> Result<TranscodeCommand> {
        if ladder.is_empty() {
            return Err(Error::InvalidInput(format!(
                "source {}x{} is below the smallest rendition",
                source.width, source.height
            )));
        }

        let mut argv = vec![
            self.ffmpeg.to_string_lossy().into_owned(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            settings.loglevel.clone(),
            "-y".to_string(),
        ];

        argv.extend(accel.input_args(&settings.vaapi_device));
        push_input(&mut argv, &source.input, live);

        let graph = strategy_for(accel).render(&ladder, settings.preset(live));
        argv.push("-filter_complex".into());
        argv.push(graph.filter);

        for (i, encoder_args) in graph.encoder_args.into_iter().enumerate() {
            argv.push("-map".into());
            argv.push(filter::output_label(i));
            argv.extend(encoder_args);
        }

        if source.has_audio {
            for (i, rung) in ladder.iter().enumerate() {
                argv.extend([
                    "-map".to_string(),
                    "0:a:0".to_string(),
                    format!("-c:a:{i}"),
                    "aac".to_string(),
                    format!("-b:a:{i}"),
                    rung.audio_bitrate.to_string(),
                    format!("-ac:a:{i}"),
                    "2".to_string(),
                ]);
            }
        }

        let (playlist_type, flags) = if live {
            ("event", "independent_segments+append_list+program_date_time")
        } else {
            ("vod", "independent_segments")
        };
        argv.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            settings.segment_seconds.to_string(),
            "-hls_playlist_type".to_string(),
            playlist_type.to_string(),
            "-hls_flags".to_string(),
            flags.to_string(),
            "-hls_segment_type".to_string(),
            "mpegts".to_string(),
            "-hls_segment_filename".to_string(),
            "%v/data%05d.ts".to_string(),
            "-master_pl_name".to_string(),
            MASTER_MANIFEST.to_string(),
            "-var_stream_map".to_string(),
            var_stream_map(&ladder, source.has_audio),
            format!("%v/{VARIANT_MANIFEST}"),
        ]);

        if live {
            argv.extend(["-map".to_string(), "0:v:0".to_string()]);
            if source.has_audio {
                argv.extend(["-map".to_string(), "0:a:0".to_string()]);
            }
            argv.extend(["-c:v".to_string(), "copy".to_string()]);
            if source.has_audio {
                argv.extend(["-c:a".to_string(), "aac".to_string()]);
            }
            argv.push(RECORDING_FILE.to_string());
        }

        Ok(TranscodeCommand { argv, ladder })
    }
}

fn push_input(argv: &mut Vec<String>, input: &InputSource, live: bool) {
    match input {
        InputSource::Pipe => argv.extend([
            "-protocol_whitelist".to_string(),
            SDP_PROTOCOL_WHITELIST.to_string(),
            "-f".to_string(),
            "sdp".to_string(),
        ]),
        _ if live => argv.push("-re".to_string()),
        _ => {}
    }
    argv.push("-i".to_string());
    argv.push(input.input_arg());
}

/// `v:0,a:0,name:1920x1080@30 v:1,a:1,name:1280x720@30 ...`
pub fn var_stream_map(ladder: &[ResolutionProfile], has_audio: bool) -> String {
    ladder
        .iter()
        .enumerate()
        .map(|(i, rung)| {
            if has_audio {
                format!("v:{i},a:{i},name:{}", rung.name())
            } else {
                format!("v:{i},name:{}", rung.name())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
