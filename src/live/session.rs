//! Per-connection live signaling state.

use std::sync::Arc;

use classcast_av::VideoSettings;
use classcast_common::{ConnectionId, StreamId};
use dashmap::DashMap;

/// Everything one ingest connection has negotiated so far.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub connection: ConnectionId,
    /// External user id taken from the upgrade request.
    pub user_id: Option<String>,
    pub pending_settings: Option<VideoSettings>,
    pub stream: Option<StreamId>,
    /// Reference of a running preview (the ingest URL).
    pub preview: Option<String>,
}

impl LiveSession {
    fn new(connection: ConnectionId, user_id: Option<String>) -> Self {
        Self {
            connection,
            user_id,
            pending_settings: None,
            stream: None,
            preview: None,
        }
    }
}

/// Connection id -> [`LiveSession`].
#[derive(Debug, Clone, Default)]
pub struct LiveSessions {
    inner: Arc<DashMap<ConnectionId, LiveSession>>,
}

impl LiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, connection: ConnectionId, user_id: Option<String>) {
        tracing::debug!(connection = %connection, user = ?user_id, "live connection opened");
        self.inner
            .insert(connection.clone(), LiveSession::new(connection, user_id));
    }

    pub fn get(&self, connection: &ConnectionId) -> Option<LiveSession> {
        self.inner.get(connection).map(|s| s.value().clone())
    }

    /// Apply `f` to the session of `connection`. Returns false if the
    /// connection is unknown.
    pub fn update(&self, connection: &ConnectionId, f: impl FnOnce(&mut LiveSession)) -> bool {
        match self.inner.get_mut(connection) {
            Some(mut session) => {
                f(session.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn close(&self, connection: &ConnectionId) -> Option<LiveSession> {
        self.inner.remove(connection).map(|(_, s)| s)
    }

    /// Geometry a connection asked for, looked up by the stream it was issued.
    pub fn settings_for(&self, stream: &StreamId) -> Option<VideoSettings> {
        let connection = ConnectionId::from(stream.session_key().as_str());
        self.inner
            .get(&connection)
            .and_then(|s| s.pending_settings)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let sessions = LiveSessions::new();
        let conn = ConnectionId::from("abc");
        sessions.open(conn.clone(), Some("55".into()));

        let settings = VideoSettings {
            width: 640,
            height: 360,
            fps: 24,
        };
        assert!(sessions.update(&conn, |s| s.pending_settings = Some(settings)));
        assert!(!sessions.update(&ConnectionId::from("zzz"), |_| {}));

        let stream = StreamId::new("55", &conn).unwrap();
        assert_eq!(sessions.settings_for(&stream), Some(settings));

        let closed = sessions.close(&conn).unwrap();
        assert_eq!(closed.user_id.as_deref(), Some("55"));
        assert!(sessions.is_empty());
        assert_eq!(sessions.settings_for(&stream), None);
    }
}
