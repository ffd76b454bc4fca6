//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use classcast::config::{Config, HwAccelPreference};
use classcast::live::{AnswerResponse, Negotiator, OfferRequest};
use classcast::Result;
use parking_lot::Mutex;

/// Config rooted at `root`, CPU-only, with the given transcoder stand-ins.
pub fn test_config(root: &Path, ffmpeg: &str, ffprobe: &str) -> Config {
    let mut config = Config::default();
    config.storage.videos_dir = root.to_path_buf();
    config.tools.ffmpeg_path = Some(PathBuf::from(ffmpeg));
    config.tools.ffprobe_path = Some(PathBuf::from(ffprobe));
    config.transcode.hw_accel = HwAccelPreference::None;
    config.transcode.stop_grace_secs = 1;
    config
}

/// Answers every offer with `answer-for-{sessionId}` and records requests
/// and releases.
#[derive(Default)]
pub struct RecordingNegotiator {
    pub requests: Mutex<Vec<OfferRequest>>,
    pub released: Mutex<Vec<String>>,
}

impl RecordingNegotiator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Negotiator for RecordingNegotiator {
    async fn negotiate(&self, offer: OfferRequest) -> Result<AnswerResponse> {
        let answer = AnswerResponse {
            session_id: Some(offer.session_id.clone()),
            sdp: format!("answer-for-{}", offer.session_id),
        };
        self.requests.lock().push(offer);
        Ok(answer)
    }

    async fn release(&self, session_id: &str) -> Result<()> {
        self.released.lock().push(session_id.to_string());
        Ok(())
    }
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
