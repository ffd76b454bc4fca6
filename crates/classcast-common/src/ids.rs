//! Typed identifiers.
//!
//! Course and class ids come from callers and name directories of the media
//! tree, so they are checked to be a single plain path segment when built.
//! Live ingest uses a [`StreamId`] of the form `{externalUserId}_{connectionId}`;
//! the supervisor addresses the process behind it by a [`SessionKey`], which is
//! the segment after the last `_`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Check that `raw` can be used as one directory name under the media root.
fn check_segment(kind: &str, raw: &str) -> crate::Result<()> {
    let unsafe_segment = raw.is_empty()
        || raw == "."
        || raw == ".."
        || raw.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if unsafe_segment {
        return Err(crate::Error::invalid_id(format!("{kind} '{}'", raw.escape_debug())));
    }
    Ok(())
}

/// Ids that become a path segment of the media tree.
macro_rules! segment_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate a raw id.
            ///
            /// # Errors
            ///
            /// Returns [`crate::Error::InvalidId`] for empty ids, `.`, `..`
            /// and ids containing path separators or control characters.
            pub fn parse(raw: &str) -> crate::Result<Self> {
                check_segment($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            /// Borrow the raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = crate::Error;

            fn try_from(raw: String) -> crate::Result<Self> {
                check_segment($kind, &raw)?;
                Ok(Self(raw))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(raw: &str) -> crate::Result<Self> {
                Self::parse(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

segment_id!(
    /// Identifier of a course in the catalog.
    CourseId,
    "course id"
);

segment_id!(
    /// Identifier of a class (lesson) inside a course.
    ClassId,
    "class id"
);

string_id!(
    /// Identifier of one WebSocket connection.
    ConnectionId
);

string_id!(
    /// Registry key of one supervised transcoder process.
    SessionKey
);

impl ConnectionId {
    /// Generate a fresh random connection id.
    ///
    /// The simple UUID form is used so the id never contains `_`.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl SessionKey {
    /// Derive the key from any stream reference (`user_conn`, an ingest URL
    /// ending in one, or a bare connection id).
    pub fn from_reference(reference: &str) -> Self {
        let tail = reference.rsplit('/').next().unwrap_or(reference);
        let key = tail.rsplit('_').next().unwrap_or(tail);
        Self(key.to_string())
    }

    /// Key under which the preview transcode of this session is registered.
    pub fn preview(&self) -> Self {
        Self(format!("preview:{}", self.0))
    }

    /// Whether this key addresses a preview process.
    pub fn is_preview(&self) -> bool {
        self.0.starts_with("preview:")
    }
}

/// A live stream id: `{externalUserId}_{connectionId}`.
///
/// The id names the output directory of a live session, so it is always a
/// single plain path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Build the id a connection hands out to its client.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidId`] if the user id is empty or
    /// contains path separators or control characters.
    pub fn new(external_user_id: &str, connection: &ConnectionId) -> crate::Result<Self> {
        Self::parse(&format!("{}_{}", external_user_id.trim(), connection))
    }

    /// Wrap a stream id received from a client.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidId`] if the id is empty, lacks the
    /// `_` separator or is not a single plain path segment.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let raw = raw.trim();
        match raw.rsplit_once('_') {
            Some((user, conn)) if !user.is_empty() && !conn.is_empty() => {
                check_segment("stream id", raw)?;
                Ok(Self(raw.to_string()))
            }
            _ => Err(crate::Error::invalid_id(format!("malformed stream id '{raw}'"))),
        }
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Registry key of the transcode behind this stream.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::from_reference(&self.0)
    }

    /// Whether this stream id was issued to the given connection.
    pub fn belongs_to(&self, connection: &ConnectionId) -> bool {
        self.0.contains(connection.as_str())
    }
}

impl TryFrom<String> for StreamId {
    type Error = crate::Error;

    fn try_from(raw: String) -> crate::Result<Self> {
        Self::parse(&raw)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> String {
        id.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
