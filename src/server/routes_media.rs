//! Preview and published HLS files.

use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use classcast_common::paths::join_within;
use classcast_common::{ClassId, CourseId};

use super::error::AppError;
use super::AppContext;
use crate::error::StreamError;

pub fn media_routes() -> Router<AppContext> {
    Router::new()
        .route("/previews/:id", get(preview_manifest))
        .route("/previews/:id/*part", get(preview_part))
        .route("/media/:course_id/:class_id/*path", get(published_file))
}

async fn preview_manifest(State(ctx): State<AppContext>, Path(id): Path<String>) -> Result<Response, AppError> {
    let manifest = ctx.previews.get_preview(&id, &ctx.shutdown).await?;
    serve_file(&manifest).await
}

async fn preview_part(
    State(ctx): State<AppContext>,
    Path((id, part)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let path = ctx.previews.resolve_part(&id, &part).await?;
    serve_file(&path).await
}

async fn published_file(
    State(ctx): State<AppContext>,
    Path((course_id, class_id, path)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let course = CourseId::parse(&course_id)?;
    let class = ClassId::parse(&class_id)?;
    let class_dir = ctx.engine.layout.class_dir(&course, &class);
    let path = join_within(&class_dir, &path)?;
    serve_file(&path).await
}

fn content_type(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn serve_file(path: &FsPath) -> Result<Response, AppError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            return Err(StreamError::NotFound(name.unwrap_or_default()).into());
        }
        Err(e) => return Err(StreamError::Io(e).into()),
    };
    Ok((
        [
            (header::CONTENT_TYPE, content_type(path)),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hls_content_types() {
        assert_eq!(content_type(FsPath::new("a/master.m3u8")), "application/vnd.apple.mpegurl");
        assert_eq!(content_type(FsPath::new("a/001.ts")), "video/mp2t");
        assert_eq!(content_type(FsPath::new("a/blob")), "application/octet-stream");
    }
}
