//! JSON text frames exchanged with ingest clients.
//!
//! Clients are loose about shape: OBS clients may tag a message with
//! `type` or just send the key that names the action, and WebRTC clients
//! send numbers either as JSON numbers or as numeric strings. Parsing
//! accepts both forms and rejects anything it cannot place.

use classcast_av::VideoSettings;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, StreamError};

/// Server to client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Reply {
    #[serde(rename = "rtmp_url")]
    RtmpUrl {
        #[serde(rename = "rtmpUrl")]
        rtmp_url: String,
    },
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "streamId")]
    StreamId {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    #[serde(rename = "webrtc-answer")]
    WebrtcAnswer { sdp: String },
    #[serde(rename = "info")]
    Info { message: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObsMessage {
    RequestRtmpUrl,
    Start { rtmp_url: String },
    /// Stop the stream behind `rtmp_url`, or the connection's own stream.
    Stop { rtmp_url: Option<String> },
}

/// Geometry fields a client may leave out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

impl PartialSettings {
    pub fn resolve(&self, defaults: VideoSettings) -> VideoSettings {
        VideoSettings {
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            fps: self.fps.unwrap_or(defaults.fps),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebRtcMessage {
    /// Ask for a stream id, optionally with desired geometry.
    Register {
        user_id: Option<String>,
        settings: PartialSettings,
    },
    /// Update the geometry of an already issued stream id.
    Settings {
        stream_id: String,
        settings: PartialSettings,
    },
    Offer { stream_id: String, sdp: String },
    Stop { stream_id: String },
}

fn object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StreamError::malformed("expected a JSON object")),
        Err(e) => Err(StreamError::malformed(e.to_string())),
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn u32_field(map: &Map<String, Value>, key: &str) -> Option<u32> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    value.filter(|v| *v > 0)
}

fn settings_field(map: &Map<String, Value>) -> PartialSettings {
    match map.get("videoSettings") {
        Some(Value::Object(settings)) => PartialSettings {
            width: u32_field(settings, "width"),
            height: u32_field(settings, "height"),
            fps: u32_field(settings, "fps"),
        },
        _ => PartialSettings::default(),
    }
}

pub fn parse_obs(text: &str) -> Result<ObsMessage> {
    let map = object(text)?;
    let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();

    if kind == "request_rtmp_url" || map.contains_key("request_rtmp_url") {
        return Ok(ObsMessage::RequestRtmpUrl);
    }
    if kind == "emitirOBS" || map.contains_key("emitirOBS") {
        return string_field(&map, "rtmpUrl")
            .map(|rtmp_url| ObsMessage::Start { rtmp_url })
            .ok_or_else(|| StreamError::malformed("rtmpUrl not provided"));
    }
    if kind == "detenerStreamOBS" || map.contains_key("detenerStreamOBS") {
        return Ok(ObsMessage::Stop {
            rtmp_url: string_field(&map, "rtmpUrl"),
        });
    }
    Err(StreamError::malformed("unrecognized message"))
}

pub fn parse_webrtc(text: &str) -> Result<WebRtcMessage> {
    let map = object(text)?;
    let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
    let stream_id = string_field(&map, "streamId");

    if let Some(stream_id) = string_field(&map, "detenerStreamWebcam") {
        return Ok(WebRtcMessage::Stop { stream_id });
    }
    if kind == "detenerStreamWebRTC" {
        return stream_id
            .map(|stream_id| WebRtcMessage::Stop { stream_id })
            .ok_or_else(|| StreamError::malformed("streamId not provided"));
    }
    if let Some(sdp) = string_field(&map, "sdp") {
        return stream_id
            .map(|stream_id| WebRtcMessage::Offer { stream_id, sdp })
            .ok_or_else(|| StreamError::malformed("offer without streamId"));
    }
    if kind == "userId" || map.contains_key("userId") || map.contains_key("videoSettings") {
        let settings = settings_field(&map);
        return Ok(match stream_id {
            Some(stream_id) => WebRtcMessage::Settings { stream_id, settings },
            None => WebRtcMessage::Register {
                user_id: string_field(&map, "userId"),
                settings,
            },
        });
    }
    Err(StreamError::malformed("unrecognized message"))
}
