use std::sync::Arc;

use classcast_av::{InputSource, SourceDescriptor};
use classcast_common::{ConnectionId, SessionKey, StreamId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::helper::{Negotiator, OfferRequest, Readiness};
use super::messages::{parse_webrtc, PartialSettings, Reply, WebRtcMessage};
use super::session::LiveSessions;
use super::start_live_session;
use crate::conversion::AssetStore;
use crate::engine::Engine;
use crate::error::Result;
use crate::supervisor::StdinFeed;

/// Signaling for browser capture negotiated through the helper.
///
/// 1. The client registers and receives `{userId}_{connectionId}`.
/// 2. It sends an SDP offer for that id; the helper answers.
/// 3. When the helper reports the RTP descriptor of the session, the
///    transcode is launched reading it from stdin.
#[derive(Clone)]
pub struct WebRtcBridge {
    engine: Engine,
    sessions: LiveSessions,
    negotiator: Arc<dyn Negotiator>,
    store: Arc<dyn AssetStore>,
    shutdown: CancellationToken,
}

impl WebRtcBridge {
    pub fn new(
        engine: Engine,
        negotiator: Arc<dyn Negotiator>,
        store: Arc<dyn AssetStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            sessions: LiveSessions::new(),
            negotiator,
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

    pub async fn handle_text(&self, connection: &ConnectionId, text: &str, out: &mpsc::UnboundedSender<Reply>) {
        let reply = match parse_webrtc(text) {
            Ok(WebRtcMessage::Register { user_id, settings }) => Some(self.register(connection, user_id, settings)),
            Ok(WebRtcMessage::Settings { stream_id, settings }) => self.update_settings(connection, &stream_id, settings),
            Ok(WebRtcMessage::Offer { stream_id, sdp }) => self.offer(connection, &stream_id, sdp).await,
            Ok(WebRtcMessage::Stop { stream_id }) => self.stop(connection, &stream_id).await,
            Err(e) => {
                tracing::warn!(connection = %connection, "dropping WebRTC message: {e}");
                Some(Reply::error(e.to_string()))
            }
        };
        if let Some(reply) = reply {
            let _ = out.send(reply);
        }
    }

    fn register(&self, connection: &ConnectionId, user_id: Option<String>, settings: PartialSettings) -> Reply {
        let known = self.sessions.get(connection).and_then(|s| s.user_id);
        let Some(user_id) = user_id.or(known) else {
            return Reply::error("userId not provided");
        };

        let stream = match StreamId::new(&user_id, connection) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(connection = %connection, "rejected user id: {e}");
                return Reply::error(e.to_string());
            }
        };
        let settings = settings.resolve(self.engine.config.live.default_settings());
        self.sessions.update(connection, |s| {
            s.user_id = Some(user_id.clone());
            s.pending_settings = Some(settings);
            s.stream = Some(stream.clone());
        });
        tracing::info!(
            connection = %connection,
            stream = %stream,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            "issued WebRTC stream id"
        );
        Reply::StreamId {
            stream_id: stream.to_string(),
        }
    }

    fn update_settings(&self, connection: &ConnectionId, stream_id: &str, settings: PartialSettings) -> Option<Reply> {
        self.owned_stream(connection, stream_id)?;
        let settings = settings.resolve(self.engine.config.live.default_settings());
        self.sessions.update(connection, |s| s.pending_settings = Some(settings));
        Some(Reply::Info {
            message: "ok".to_string(),
        })
    }

    async fn offer(&self, connection: &ConnectionId, stream_id: &str, sdp: String) -> Option<Reply> {
        let stream = self.owned_stream(connection, stream_id)?;
        let settings = self
            .sessions
            .get(connection)
            .and_then(|s| s.pending_settings)
            .unwrap_or_else(|| self.engine.config.live.default_settings());
        self.sessions.update(connection, |s| s.stream = Some(stream.clone()));

        let request = OfferRequest {
            session_id: stream.to_string(),
            sdp,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
        };
        tracing::info!(stream = %stream, "negotiating offer");
        Some(match self.negotiator.negotiate(request).await {
            Ok(answer) => Reply::WebrtcAnswer { sdp: answer.sdp },
            Err(e) => {
                tracing::error!(stream = %stream, "negotiation failed: {e}");
                Reply::error(e.to_string())
            }
        })
    }

    async fn stop(&self, connection: &ConnectionId, stream_id: &str) -> Option<Reply> {
        let stream = self.owned_stream(connection, stream_id)?;
        if let Err(e) = self.negotiator.release(stream.as_str()).await {
            tracing::warn!(stream = %stream, "failed to release helper peer: {e}");
        }
        match self.engine.supervisor.stop(&stream.session_key(), &self.shutdown).await {
            Ok(outcome) => {
                tracing::info!(stream = %stream, outcome = ?outcome, "WebRTC stream stopped");
                None
            }
            Err(e) => Some(Reply::error(e.to_string())),
        }
    }

    /// The stream id, if it was issued to this connection. Anything else is
    /// logged and dropped without a reply.
    fn owned_stream(&self, connection: &ConnectionId, stream_id: &str) -> Option<StreamId> {
        match StreamId::parse(stream_id) {
            Ok(stream) if stream.belongs_to(connection) => Some(stream),
            _ => {
                tracing::warn!(connection = %connection, stream = %stream_id, "stream id does not belong to this connection");
                None
            }
        }
    }

    pub async fn close(&self, connection: &ConnectionId) {
        let session = self.sessions.close(connection);
        if let Some(stream) = session.and_then(|s| s.stream) {
            if let Err(e) = self.negotiator.release(stream.as_str()).await {
                tracing::warn!(stream = %stream, "failed to release helper peer: {e}");
            }
        }
        let key = SessionKey::from(connection.as_str());
        if let Err(e) = self.engine.supervisor.stop(&key, &self.shutdown).await {
            tracing::error!(connection = %connection, "failed to stop live session: {e}");
        }
        tracing::debug!(connection = %connection, "WebRTC connection closed");
    }

    /// Launch the transcode of a session whose descriptor the helper has
    /// written.
    pub async fn on_ready(&self, ready: Readiness) -> Result<SessionKey> {
        let stream = StreamId::parse(&ready.session_id)?;
        let descriptor = tokio::fs::read(&ready.descriptor_path).await?;
        let settings = self
            .sessions
            .settings_for(&stream)
            .unwrap_or_else(|| self.engine.config.live.default_settings());
        let source = SourceDescriptor::from_settings(InputSource::Pipe, settings);
        start_live_session(
            &self.engine,
            &self.store,
            &stream,
            source,
            StdinFeed::Immediately(descriptor),
        )
        .await
    }

    /// Consume helper readiness events until the channel closes or the
    /// bridge shuts down.
    pub fn spawn_readiness_loop(&self, mut rx: mpsc::UnboundedReceiver<Readiness>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            loop {
                let ready = tokio::select! {
                    _ = bridge.shutdown.cancelled() => break,
                    ready = rx.recv() => match ready {
                        Some(ready) => ready,
                        None => break,
                    },
                };
                let session = ready.session_id.clone();
                if let Err(e) = bridge.on_ready(ready).await {
                    tracing::error!(session = %session, "failed to start transcode for WebRTC session: {e}");
                }
            }
        })
    }
}
