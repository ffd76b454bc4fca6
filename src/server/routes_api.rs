//! Conversion and session endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use classcast_common::CourseId;
use serde_json::json;

use super::error::AppError;
use super::AppContext;
use crate::conversion::{ClassAsset, CourseAssets};
use crate::error::StreamError;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/courses/:course_id/convert", post(convert_course))
        .route("/courses/:course_id/manifests", get(course_manifests))
        .route("/sessions", get(list_sessions))
}

/// Queue a course for conversion. Returns as soon as the batch is scheduled.
async fn convert_course(
    State(ctx): State<AppContext>,
    Path(course_id): Path<String>,
    body: Result<Json<Vec<ClassAsset>>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = CourseId::parse(&course_id)?;
    // Invalid class ids surface here as a rejected body.
    let Json(classes) = body.map_err(|e| StreamError::InvalidInput(e.body_text()))?;
    if classes.is_empty() {
        return Err(StreamError::InvalidInput(format!("course '{course_id}' has no classes")).into());
    }

    let course = CourseAssets { course_id, classes };
    let body = json!({
        "courseId": course.course_id,
        "classes": course.classes.len(),
    });

    let coordinator = ctx.coordinator.clone();
    tokio::spawn(async move {
        let course_id = course.course_id.clone();
        if let Err(e) = coordinator.convert_all(course).await {
            tracing::error!(course = %course_id, "batch conversion rejected: {e}");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(body)))
}

async fn course_manifests(
    State(ctx): State<AppContext>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let course = CourseId::parse(&course_id)?;
    let manifests: Vec<_> = ctx
        .store
        .course_manifests(&course)
        .into_iter()
        .map(|(class_id, manifest)| json!({ "classId": class_id, "manifest": manifest }))
        .collect();
    Ok(Json(manifests))
}

async fn list_sessions(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.engine.supervisor.list())
}
