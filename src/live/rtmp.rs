use std::sync::Arc;

use classcast_common::{ConnectionId, SessionKey, StreamId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::messages::{parse_obs, ObsMessage, Reply};
use super::session::LiveSessions;
use super::{start_live_session, stream_url};
use crate::conversion::AssetStore;
use crate::engine::Engine;
use crate::error::{Result, StreamError};
use crate::preview::PreviewService;
use crate::supervisor::StdinFeed;

/// Signaling for OBS-style RTMP pushes.
///
/// The client asks for an ingest URL, pushes to it, then sends a start
/// message. The preview transcode is launched as soon as the URL is handed
/// out, the durable one on the start message.
#[derive(Clone)]
pub struct ObsBridge {
    engine: Engine,
    sessions: LiveSessions,
    previews: PreviewService,
    store: Arc<dyn AssetStore>,
    shutdown: CancellationToken,
}

impl ObsBridge {
    pub fn new(
        engine: Engine,
        previews: PreviewService,
        store: Arc<dyn AssetStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            sessions: LiveSessions::new(),
            previews,
            store,
            shutdown,
        }
    }

    pub fn sessions(&self) -> &LiveSessions {
        &self.sessions
    }

    pub fn open(&self, connection: ConnectionId, user_id: Option<String>) {
        self.sessions.open(connection, user_id);
    }

    /// Handle one text frame. Replies go to `out`; nothing here closes the
    /// connection.
    pub async fn handle_text(&self, connection: &ConnectionId, text: &str, out: &mpsc::UnboundedSender<Reply>) {
        let reply = match parse_obs(text) {
            Ok(ObsMessage::RequestRtmpUrl) => Some(self.request_url(connection).await),
            Ok(ObsMessage::Start { rtmp_url }) => Some(match self.start(connection, &rtmp_url).await {
                Ok(()) => Reply::Start,
                Err(e) => Reply::error(e.to_string()),
            }),
            Ok(ObsMessage::Stop { rtmp_url }) => self
                .stop(connection, rtmp_url.as_deref())
                .await
                .err()
                .map(|e| Reply::error(e.to_string())),
            Err(e) => {
                tracing::warn!(connection = %connection, "dropping OBS message: {e}");
                Some(Reply::error(e.to_string()))
            }
        };
        if let Some(reply) = reply {
            let _ = out.send(reply);
        }
    }

    async fn request_url(&self, connection: &ConnectionId) -> Reply {
        let Some(user_id) = self.sessions.get(connection).and_then(|s| s.user_id) else {
            return Reply::error("userId not provided");
        };

        let stream = match StreamId::new(&user_id, connection) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(connection = %connection, "rejected user id: {e}");
                return Reply::error(e.to_string());
            }
        };
        let live = &self.engine.config.live;
        let public = stream_url(&live.rtmp_public_base, &stream);
        let ingest = stream_url(&live.rtmp_ingest_base, &stream);
        tracing::info!(connection = %connection, stream = %stream, url = %public, "issued RTMP URL");

        self.sessions.update(connection, |s| {
            s.stream = Some(stream.clone());
            s.preview = Some(ingest.clone());
        });

        if let Err(e) = self.previews.start(&ingest).await {
            tracing::warn!(stream = %stream, "preview not started: {e}");
        }

        Reply::RtmpUrl { rtmp_url: public }
    }

    async fn start(&self, connection: &ConnectionId, rtmp_url: &str) -> Result<()> {
        let stream = stream_from_url(rtmp_url)?;
        if !stream.belongs_to(connection) {
            tracing::warn!(connection = %connection, stream = %stream, "start for a foreign stream rejected");
            return Err(StreamError::InvalidInput("stream does not belong to this connection".into()));
        }
        let key = stream.session_key();
        if self.engine.supervisor.contains(&key) {
            return Err(StreamError::AlreadyRunning(key));
        }

        let ingest = stream_url(&self.engine.config.live.rtmp_ingest_base, &stream);
        let source = self
            .engine
            .probe
            .probe_or_default(&ingest, self.engine.config.live.default_settings())
            .await;
        start_live_session(&self.engine, &self.store, &stream, source, StdinFeed::Closed).await?;
        self.sessions.update(connection, |s| s.stream = Some(stream));
        Ok(())
    }

    async fn stop(&self, connection: &ConnectionId, rtmp_url: Option<&str>) -> Result<()> {
        let key = match rtmp_url {
            Some(url) => stream_from_url(url)?.session_key(),
            None => SessionKey::from(connection.as_str()),
        };
        self.engine.supervisor.stop(&key, &self.shutdown).await?;
        Ok(())
    }

    /// Tear down everything the connection started. Errors are logged.
    pub async fn close(&self, connection: &ConnectionId) {
        let session = self.sessions.close(connection);
        let key = SessionKey::from(connection.as_str());
        if let Err(e) = self.engine.supervisor.stop(&key, &self.shutdown).await {
            tracing::error!(connection = %connection, "failed to stop live session: {e}");
        }
        if let Some(preview) = session.and_then(|s| s.preview) {
            if let Err(e) = self.previews.discard(&preview, &self.shutdown).await {
                tracing::error!(connection = %connection, "failed to discard preview: {e}");
            }
        }
        tracing::debug!(connection = %connection, "OBS connection closed");
    }
}

fn stream_from_url(url: &str) -> Result<StreamId> {
    let tail = url.rsplit('/').next().unwrap_or(url);
    Ok(StreamId::parse(tail)?)
}
