//! # classcast-av
//!
//! The media side of classcast: everything that talks to ffmpeg/ffprobe
//! without owning a long-running process.
//!
//! - [`CapabilityDetector`] picks VAAPI, NVIDIA or software paths
//! - [`SourceProbe`] reads width/height/fps/audio from a source
//! - [`ladder::plan`] chooses the ABR renditions for a source
//! - [`CommandBuilder`] turns all of that into an ffmpeg argv
//!
//! ## Example
//!
//! ```no_run
//! use classcast_av::{AccelerationMode, CommandBuilder, SourceProbe, TranscodeSettings};
//! use std::path::Path;
//!
//! # async fn example() -> classcast_av::Result<()> {
//! let source = SourceProbe::new("ffprobe")
//!     .probe_file(Path::new("/uploads/lesson.mp4"))
//!     .await?;
//! let cmd = CommandBuilder::default().build(
//!     &source,
//!     false,
//!     AccelerationMode::None,
//!     &TranscodeSettings::default(),
//! )?;
//! println!("{}", cmd.display());
//! # Ok(())
//! # }
//! ```

pub mod accel;
pub mod command;
mod error;
pub mod hls;
pub mod ladder;
pub mod probe;
pub mod tools;

// Re-exports
pub use accel::{AccelerationMode, CapabilityDetector};
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use hls::{CommandBuilder, FilterGraphStrategy, TranscodeCommand, TranscodeSettings};
pub use ladder::ResolutionProfile;
pub use probe::{InputSource, SourceDescriptor, SourceProbe, VideoSettings};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo, ToolPaths};
