//! On-disk layout of published media.
//!
//! ```text
//! {root}/{courseId}/{classId}/master.m3u8
//! {root}/{courseId}/{classId}/{W}x{H}@{fps}/stream.m3u8
//! {root}/{courseId}/{classId}/{W}x{H}@{fps}/data%05d.ts
//! {root}/{courseId}/{classId}/original.mp4        (live only)
//! {root}/live/{streamId}/...                      (live without a catalog target)
//! {root}/previews/{previewId}.m3u8
//! {root}/previews/{previewId}/%03d.ts
//! ```

use std::path::{Component, Path, PathBuf};

use crate::{ClassId, CourseId, Error, Result, StreamId};

/// File name of the master playlist.
pub const MASTER_MANIFEST: &str = "master.m3u8";

/// File name of the per-rendition playlist.
pub const VARIANT_MANIFEST: &str = "stream.m3u8";

/// File name of the retained live recording.
pub const RECORDING_FILE: &str = "original.mp4";

/// Directory (under the root) holding previews.
pub const PREVIEWS_DIR: &str = "previews";

/// Directory (under the root) holding live sessions without a catalog target.
pub const LIVE_DIR: &str = "live";

const MANIFEST_EXTENSION: &str = "m3u8";

/// Resolves every location the engine writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{course}/{class}`
    pub fn class_dir(&self, course: &CourseId, class: &ClassId) -> PathBuf {
        self.root.join(course.as_str()).join(class.as_str())
    }

    /// `{root}/{course}/{class}/master.m3u8`
    pub fn master_manifest(&self, course: &CourseId, class: &ClassId) -> PathBuf {
        self.class_dir(course, class).join(MASTER_MANIFEST)
    }

    /// Output directory of a live session with no catalog target.
    pub fn live_dir(&self, stream: &StreamId) -> PathBuf {
        self.root.join(LIVE_DIR).join(stream.as_str())
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.root.join(PREVIEWS_DIR)
    }

    /// `{root}/previews/{id}.m3u8`
    pub fn preview_manifest(&self, preview_id: &str) -> PathBuf {
        self.previews_dir()
            .join(format!("{preview_id}.{MANIFEST_EXTENSION}"))
    }

    /// `{root}/previews/{id}/`
    pub fn preview_segments_dir(&self, preview_id: &str) -> PathBuf {
        self.previews_dir().join(preview_id)
    }

    /// Whether `path` already sits in the canonical class directory.
    pub fn is_published(&self, course: &CourseId, class: &ClassId, path: &Path) -> bool {
        path.starts_with(self.class_dir(course, class))
    }
}

/// Check if a path points at an HLS playlist.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use classcast_common::paths::is_manifest;
///
/// assert!(is_manifest(Path::new("/media/1/2/master.m3u8")));
/// assert!(!is_manifest(Path::new("/uploads/lesson.mp4")));
/// ```
pub fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
        .unwrap_or(false)
}

/// Check if the final path component has an extension at all.
pub fn has_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| !ext.is_empty())
}

/// Join `relative` onto `base`, rejecting absolute paths and any `..`.
///
/// # Errors
///
/// Returns [`Error::PathEscape`] if the joined path could leave `base`.
pub fn join_within(base: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let mut out = base.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(Error::PathEscape(relative.to_string())),
        }
    }
    Ok(out)
}
