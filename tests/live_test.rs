//! Signaling flows of the OBS and WebRTC bridges, driven without sockets.

mod common;

use std::sync::Arc;

use classcast::conversion::{AssetStore, MemoryAssetStore};
use classcast::engine::Engine;
use classcast::live::{ObsBridge, Readiness, Reply, WebRtcBridge};
use classcast::preview::PreviewService;
use classcast_common::{ConnectionId, SessionKey};
use common::RecordingNegotiator;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct WebRtcHarness {
    media: TempDir,
    bridge: WebRtcBridge,
    negotiator: Arc<RecordingNegotiator>,
    out: mpsc::UnboundedSender<Reply>,
    replies: mpsc::UnboundedReceiver<Reply>,
}

impl WebRtcHarness {
    fn new(ffmpeg: &str) -> Self {
        let media = tempdir().unwrap();
        let engine = Engine::from_config(common::test_config(media.path(), ffmpeg, "nonexistent-ffprobe"));
        let negotiator = RecordingNegotiator::new();
        let store: Arc<dyn AssetStore> = Arc::new(MemoryAssetStore::new());
        let bridge = WebRtcBridge::new(engine, negotiator.clone(), store, CancellationToken::new());
        let (out, replies) = mpsc::unbounded_channel();
        Self {
            media: media,
            bridge,
            negotiator,
            out,
            replies,
        }
    }

    async fn send(&mut self, conn: &ConnectionId, text: &str) -> Option<Reply> {
        self.bridge.handle_text(conn, text, &self.out).await;
        self.replies.try_recv().ok()
    }
}

fn conn1() -> ConnectionId {
    ConnectionId::from("conn1")
}

#[tokio::test]
async fn test_webrtc_register_and_offer() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), None);

    let reply = h
        .send(
            &conn,
            r#"{"userId":"55","videoSettings":{"width":"640","height":"360","fps":"24"}}"#,
        )
        .await;
    assert_eq!(
        reply,
        Some(Reply::StreamId {
            stream_id: "55_conn1".into()
        })
    );

    // An offer for somebody else's stream is dropped silently.
    let reply = h.send(&conn, r#"{"streamId":"99_other","sdp":"v=0"}"#).await;
    assert_eq!(reply, None);
    assert_eq!(h.negotiator.calls(), 0);

    let reply = h.send(&conn, r#"{"streamId":"55_conn1","sdp":"v=0"}"#).await;
    assert_eq!(
        reply,
        Some(Reply::WebrtcAnswer {
            sdp: "answer-for-55_conn1".into()
        })
    );
    let requests = h.negotiator.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_id, "55_conn1");
    assert_eq!((requests[0].width, requests[0].height, requests[0].fps), (640, 360, 24));
}

#[tokio::test]
async fn test_webrtc_register_uses_connection_user() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), Some("12".into()));

    let reply = h.send(&conn, r#"{"videoSettings":{}}"#).await;
    assert_eq!(
        reply,
        Some(Reply::StreamId {
            stream_id: "12_conn1".into()
        })
    );
}

#[tokio::test]
async fn test_webrtc_malformed_message_keeps_connection() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), None);

    let reply = h.send(&conn, "{not json").await;
    assert!(matches!(reply, Some(Reply::Error { .. })));

    let reply = h.send(&conn, r#"{"userId":"55"}"#).await;
    assert!(matches!(reply, Some(Reply::StreamId { .. })));
}

#[tokio::test]
async fn test_webrtc_settings_update() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), None);
    h.send(&conn, r#"{"userId":"55"}"#).await;

    let reply = h
        .send(&conn, r#"{"streamId":"55_conn1","videoSettings":{"width":1920,"height":1080}}"#)
        .await;
    assert_eq!(
        reply,
        Some(Reply::Info {
            message: "ok".into()
        })
    );
    let settings = h.bridge.sessions().get(&conn).unwrap().pending_settings.unwrap();
    assert_eq!((settings.width, settings.height), (1920, 1080));
}

#[cfg(unix)]
#[tokio::test]
async fn test_readiness_starts_transcode() {
    let h = WebRtcHarness::new("true");
    let descriptor = h.media.path().join("55_conn1.sdp");
    std::fs::write(&descriptor, "v=0\n").unwrap();

    let key = h
        .bridge
        .on_ready(Readiness {
            session_id: "55_conn1".into(),
            descriptor_path: descriptor,
        })
        .await
        .unwrap();
    assert_eq!(key, SessionKey::from("conn1"));
}

#[tokio::test]
async fn test_readiness_with_missing_descriptor_fails() {
    let h = WebRtcHarness::new("true");
    let result = h
        .bridge
        .on_ready(Readiness {
            session_id: "55_conn1".into(),
            descriptor_path: h.media.path().join("absent.sdp"),
        })
        .await;
    assert!(result.is_err());
}

fn obs_bridge(media: &std::path::Path) -> ObsBridge {
    let engine = Engine::from_config(common::test_config(
        media,
        "nonexistent-ffmpeg",
        "nonexistent-ffprobe",
    ));
    let previews = PreviewService::new(engine.clone());
    let store: Arc<dyn AssetStore> = Arc::new(MemoryAssetStore::new());
    ObsBridge::new(engine, previews, store, CancellationToken::new())
}

#[tokio::test]
async fn test_obs_url_requires_user() {
    let media = tempdir().unwrap();
    let bridge = obs_bridge(media.path());
    let (out, mut replies) = mpsc::unbounded_channel();
    let conn = conn1();
    bridge.open(conn.clone(), None);

    bridge.handle_text(&conn, r#"{"request_rtmp_url":true}"#, &out).await;
    assert_eq!(replies.try_recv().ok(), Some(Reply::error("userId not provided")));
}

#[tokio::test]
async fn test_obs_url_issued_for_user() {
    let media = tempdir().unwrap();
    let bridge = obs_bridge(media.path());
    let (out, mut replies) = mpsc::unbounded_channel();
    let conn = conn1();
    bridge.open(conn.clone(), Some("55".into()));

    // The preview transcoder cannot launch here; the URL is issued anyway.
    bridge.handle_text(&conn, r#"{"type":"request_rtmp_url"}"#, &out).await;
    assert_eq!(
        replies.try_recv().ok(),
        Some(Reply::RtmpUrl {
            rtmp_url: "rtmp://localhost:1935/live/55_conn1".into()
        })
    );
    let session = bridge.sessions().get(&conn).unwrap();
    assert_eq!(session.stream.unwrap().as_str(), "55_conn1");

    bridge.close(&conn).await;
    assert!(bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_obs_start_for_foreign_stream_is_rejected() {
    let media = tempdir().unwrap();
    let bridge = obs_bridge(media.path());
    let (out, mut replies) = mpsc::unbounded_channel();
    let conn = conn1();
    bridge.open(conn.clone(), Some("55".into()));

    bridge
        .handle_text(&conn, r#"{"emitirOBS":true,"rtmpUrl":"rtmp://h/live/99_other"}"#, &out)
        .await;
    assert!(matches!(replies.try_recv().ok(), Some(Reply::Error { .. })));
}

#[tokio::test]
async fn test_obs_stop_without_session_is_silent() {
    let media = tempdir().unwrap();
    let bridge = obs_bridge(media.path());
    let (out, mut replies) = mpsc::unbounded_channel();
    let conn = conn1();
    bridge.open(conn.clone(), Some("55".into()));

    bridge.handle_text(&conn, r#"{"detenerStreamOBS":true}"#, &out).await;
    assert!(replies.try_recv().is_err());
}

#[tokio::test]
async fn test_webrtc_rejects_path_like_user_id() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), None);

    let reply = h.send(&conn, r#"{"userId":"../../../tmp/evil"}"#).await;
    assert!(matches!(reply, Some(Reply::Error { .. })), "{reply:?}");
    assert!(h.bridge.sessions().get(&conn).unwrap().stream.is_none());

    // The connection is still usable with a sane id.
    let reply = h.send(&conn, r#"{"userId":"55"}"#).await;
    assert!(matches!(reply, Some(Reply::StreamId { .. })));
}

#[tokio::test]
async fn test_obs_rejects_path_like_user_id() {
    let media = tempdir().unwrap();
    let bridge = obs_bridge(media.path());
    let (out, mut replies) = mpsc::unbounded_channel();
    let conn = conn1();
    bridge.open(conn.clone(), Some("..\\..\\evil".into()));

    bridge.handle_text(&conn, r#"{"request_rtmp_url":true}"#, &out).await;
    assert!(matches!(replies.try_recv().ok(), Some(Reply::Error { .. })));
    assert!(bridge.sessions().get(&conn).unwrap().stream.is_none());
    assert!(!media.path().join("previews").exists());
}

#[tokio::test]
async fn test_webrtc_stop_then_offer_again() {
    let mut h = WebRtcHarness::new("nonexistent-ffmpeg");
    let conn = conn1();
    h.bridge.open(conn.clone(), None);
    h.send(&conn, r#"{"userId":"55"}"#).await;

    let offer = r#"{"streamId":"55_conn1","sdp":"v=0"}"#;
    assert!(matches!(h.send(&conn, offer).await, Some(Reply::WebrtcAnswer { .. })));

    let reply = h
        .send(&conn, r#"{"type":"detenerStreamWebRTC","streamId":"55_conn1"}"#)
        .await;
    assert_eq!(reply, None);
    assert_eq!(*h.negotiator.released.lock(), vec!["55_conn1".to_string()]);

    assert!(matches!(h.send(&conn, offer).await, Some(Reply::WebrtcAnswer { .. })));
    assert_eq!(h.negotiator.calls(), 2);

    h.bridge.close(&conn).await;
    assert_eq!(h.negotiator.released.lock().len(), 2);
}
