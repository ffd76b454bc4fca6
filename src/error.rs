//! Session-level error taxonomy.

use classcast_common::SessionKey;

/// Result type alias using [`StreamError`].
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A process is already registered under this key; nothing was spawned.
    #[error("a session is already running for key '{0}'")]
    AlreadyRunning(SessionKey),

    /// The transcoder could not be started.
    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    /// A wait was cancelled before it completed.
    #[error("interrupted while {0}")]
    Interrupted(String),

    /// The process survived SIGKILL or could not be signalled at all.
    #[error("failed to kill session '{key}': {message}")]
    ForceKill { key: SessionKey, message: String },

    /// The negotiation helper is down and could not be restarted.
    #[error("negotiation helper unavailable: {0}")]
    HelperUnavailable(String),

    /// A signaling or helper message could not be understood.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The preview manifest never appeared.
    #[error("preview '{0}' not available")]
    PreviewTimeout(String),

    /// The asset store refused a conversion result.
    #[error("failed to record result: {0}")]
    Persist(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Probing, planning or command construction failed.
    #[error(transparent)]
    Av(#[from] classcast_av::Error),

    #[error(transparent)]
    Common(#[from] classcast_common::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn launch(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            program: program.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// Status code reported to HTTP callers.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AlreadyRunning(_) => 409,
            Self::NotFound(_) | Self::PreviewTimeout(_) => 404,
            Self::InvalidInput(_) | Self::MalformedMessage(_) | Self::Common(_) => 400,
            Self::HelperUnavailable(_) => 503,
            Self::Av(e) if matches!(e, classcast_av::Error::FileNotFound { .. }) => 404,
            _ => 500,
        }
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "already_running",
            Self::Launch { .. } => "launch_failed",
            Self::Interrupted(_) => "interrupted",
            Self::ForceKill { .. } => "force_kill_failed",
            Self::HelperUnavailable(_) => "helper_unavailable",
            Self::MalformedMessage(_) => "malformed_message",
            Self::PreviewTimeout(_) => "preview_unavailable",
            Self::Persist(_) => "persist_failed",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) | Self::Common(_) => "invalid_input",
            Self::Av(e) if e.is_probe_failure() => "probe_failed",
            Self::Av(_) => "media_error",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(StreamError::AlreadyRunning(SessionKey::from("k")).http_status(), 409);
        assert_eq!(StreamError::PreviewTimeout("p".into()).http_status(), 404);
        assert_eq!(StreamError::HelperUnavailable("down".into()).http_status(), 503);
        assert_eq!(StreamError::launch("ffmpeg", "boom").http_status(), 500);
    }

    #[test]
    fn probe_failures_are_coded() {
        let err = StreamError::from(classcast_av::Error::NoVideoStream {
            source_ref: "a.m4a".into(),
        });
        assert_eq!(err.code(), "probe_failed");
    }
}
