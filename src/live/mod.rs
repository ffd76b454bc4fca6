//! Live ingest over WebSocket signaling.
//!
//! Two bridges turn client messages into supervised transcodes:
//! [`ObsBridge`] for RTMP pushes and [`WebRtcBridge`] for browser capture
//! negotiated through the helper process. Both key the durable transcode by
//! the trailing segment of the stream id, so a connection owns at most one.

pub mod helper;
pub mod messages;
mod rtmp;
mod session;
mod webrtc;

pub use helper::{AnswerResponse, ArmedSessions, HelperProcess, Negotiator, OfferRequest, Readiness};
pub use messages::Reply;
pub use rtmp::ObsBridge;
pub use session::{LiveSession, LiveSessions};
pub use webrtc::WebRtcBridge;

use std::sync::Arc;

use classcast_av::SourceDescriptor;
use classcast_common::{paths, SessionKey, StreamId};

use crate::conversion::AssetStore;
use crate::engine::Engine;
use crate::error::{Result, StreamError};
use crate::supervisor::{LaunchSpec, StdinFeed};

/// Launch the durable multi-rendition transcode of a live stream.
///
/// Output goes to the class directory when the catalog routes the stream
/// to a class, otherwise to `{root}/live/{streamId}`. The returned key
/// addresses the session on the supervisor.
pub(crate) async fn start_live_session(
    engine: &Engine,
    store: &Arc<dyn AssetStore>,
    stream: &StreamId,
    source: SourceDescriptor,
    stdin: StdinFeed,
) -> Result<SessionKey> {
    let key = stream.session_key();
    if engine.supervisor.contains(&key) {
        return Err(StreamError::AlreadyRunning(key));
    }

    let target = store.live_target(stream).await;
    let out_dir = match &target {
        Some((course, class)) => engine.layout.class_dir(course, class),
        None => engine.layout.live_dir(stream),
    };

    let accel = engine.accel().await;
    let command = engine.builder.build(&source, true, accel, &engine.settings)?;
    tracing::info!(
        stream = %stream,
        key = %key,
        accel = %accel,
        width = source.width,
        height = source.height,
        fps = source.fps,
        audio = source.has_audio,
        renditions = command.ladder.len(),
        "starting live transcode"
    );
    tracing::debug!(command = %command.display(), "transcoder argv");

    let launched = engine
        .supervisor
        .start(LaunchSpec::new(key.clone(), command.argv, &out_dir).stdin(stdin))
        .await?;

    if let Some((course, class)) = target {
        let manifest = out_dir.join(paths::MASTER_MANIFEST);
        if let Err(e) = store.persist_manifest(&course, &class, &manifest).await {
            tracing::error!(stream = %stream, "failed to persist live manifest: {e:#}");
        }
    }

    let stream = stream.clone();
    tokio::spawn(async move {
        match launched.wait().await {
            Ok(report) if report.success() || report.stopped => {
                tracing::info!(stream = %stream, "live transcode ended");
            }
            Ok(report) => {
                tracing::warn!(stream = %stream, "live transcode failed: {}", report.describe());
            }
            Err(e) => tracing::warn!(stream = %stream, "{e}"),
        }
    });

    Ok(key)
}

/// `{base}/{stream}` without doubled slashes.
pub(crate) fn stream_url(base: &str, stream: &StreamId) -> String {
    format!("{}/{}", base.trim_end_matches('/'), stream)
}
