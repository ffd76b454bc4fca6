//! Low-latency previews of RTMP ingests.
//!
//! A preview is a single-rendition transcode running next to the durable
//! session, registered under the `preview:` form of the session key. Its
//! playlist lands at `{root}/previews/{previewId}.m3u8` and its segments in
//! the sibling `{previewId}/` directory.

use std::path::PathBuf;

use classcast_av::hls::preview::build_preview;
use classcast_common::paths::join_within;
use classcast_common::SessionKey;
use tokio_util::sync::CancellationToken;

use crate::config::PreviewConfig;
use crate::engine::Engine;
use crate::error::{Result, StreamError};
use crate::supervisor::{LaunchSpec, StopOutcome};

#[derive(Clone)]
pub struct PreviewService {
    engine: Engine,
    config: PreviewConfig,
}

impl PreviewService {
    pub fn new(engine: Engine) -> Self {
        let config = engine.config.preview.clone();
        Self { engine, config }
    }

    pub fn with_config(engine: Engine, config: PreviewConfig) -> Self {
        Self { engine, config }
    }

    /// Start the preview transcode of `url` and return the preview id, the
    /// last path segment of the URL.
    pub async fn start(&self, url: &str) -> Result<String> {
        let preview_id = preview_id(url)?;
        let manifest = self.manifest_path(&preview_id)?;
        let segments = self.engine.layout.preview_segments_dir(&preview_id);
        tokio::fs::create_dir_all(&segments).await?;

        let accel = self.engine.accel().await;
        let argv = build_preview(
            &self.engine.ffmpeg,
            url,
            &preview_id,
            &manifest,
            &segments,
            accel,
            &self.engine.settings.vaapi_device,
        );

        let key = preview_key(&preview_id);
        self.engine
            .supervisor
            .start(LaunchSpec::new(key, argv, self.engine.layout.previews_dir()))
            .await?;
        tracing::info!(preview = %preview_id, accel = %accel, "preview started");
        Ok(preview_id)
    }

    /// Wait for the preview playlist of `preview_id` to appear.
    ///
    /// # Errors
    ///
    /// - [`StreamError::NotFound`] if no preview process is running and no
    ///   playlist exists.
    /// - [`StreamError::PreviewTimeout`] once all poll attempts are spent.
    /// - [`StreamError::Interrupted`] if `cancel` fires.
    pub async fn get_preview(&self, preview_id: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let manifest = self.manifest_path(preview_id)?;
        let key = preview_key(preview_id);

        for _ in 0..self.config.max_attempts {
            if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
                return Ok(manifest);
            }
            if !self.engine.supervisor.contains(&key) {
                return Err(StreamError::NotFound(format!("preview '{preview_id}'")));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(StreamError::Interrupted(format!("waiting for preview '{preview_id}'")));
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        tracing::warn!(preview = %preview_id, attempts = self.config.max_attempts, "preview playlist never appeared");
        Err(StreamError::PreviewTimeout(preview_id.to_string()))
    }

    /// Resolve a segment of a preview relative to the playlist's directory.
    pub async fn resolve_part(&self, preview_id: &str, part: &str) -> Result<PathBuf> {
        let manifest = self.manifest_path(preview_id)?;
        let parent = manifest
            .parent()
            .ok_or_else(|| StreamError::NotFound(format!("preview '{preview_id}'")))?;
        let path = join_within(parent, &format!("{preview_id}/{part}"))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StreamError::NotFound(format!("preview part '{part}'")));
        }
        Ok(path)
    }

    /// Stop the preview of `reference` and delete its files.
    pub async fn discard(&self, reference: &str, cancel: &CancellationToken) -> Result<StopOutcome> {
        let preview_id = preview_id(reference)?;
        let outcome = self
            .engine
            .supervisor
            .stop_with_grace(&preview_key(&preview_id), self.config.stop_grace(), cancel)
            .await?;

        let segments = self.engine.layout.preview_segments_dir(&preview_id);
        if let Err(e) = tokio::fs::remove_dir_all(&segments).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(preview = %preview_id, "failed to remove preview segments: {e}");
            }
        }
        let manifest = self.engine.layout.preview_manifest(&preview_id);
        if let Err(e) = tokio::fs::remove_file(&manifest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(preview = %preview_id, "failed to remove preview playlist: {e}");
            }
        }

        tracing::debug!(preview = %preview_id, outcome = ?outcome, "preview discarded");
        Ok(outcome)
    }

    fn manifest_path(&self, preview_id: &str) -> Result<PathBuf> {
        let preview_id = preview_id_checked(preview_id)?;
        Ok(self.engine.layout.preview_manifest(preview_id))
    }
}

fn preview_key(preview_id: &str) -> SessionKey {
    SessionKey::from_reference(preview_id).preview()
}

/// Last path segment of a URL or stream reference.
fn preview_id(reference: &str) -> Result<String> {
    let id = reference.rsplit('/').next().unwrap_or(reference);
    preview_id_checked(id).map(str::to_string)
}

fn preview_id_checked(id: &str) -> Result<&str> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(StreamError::InvalidInput(format!("invalid preview id '{id}'")));
    }
    Ok(id)
}
