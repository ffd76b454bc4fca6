//! Classcast-Common: identifiers and on-disk layout shared by the classcast crates.
//!
//! - **Typed IDs**: course/class ids, live stream ids and the session keys
//!   derived from them
//! - **Layout**: where renditions, master playlists, recordings and previews
//!   live under the media root
//!
//! # Examples
//!
//! ```
//! use classcast_common::{ConnectionId, StreamId};
//!
//! let conn = ConnectionId::from("c0ffee");
//! let stream = StreamId::new("55", &conn).unwrap();
//! assert_eq!(stream.to_string(), "55_c0ffee");
//! assert_eq!(stream.session_key().as_str(), "c0ffee");
//!
//! // Ids end up as directory names, so separators are refused.
//! assert!(StreamId::new("../tmp", &conn).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::*;
pub use paths::MediaLayout;
