//! Error-to-HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::StreamError;

/// Wrapper so handlers can return `Result<T, AppError>` and use `?` on
/// [`StreamError`].
pub struct AppError(pub StreamError);

impl From<StreamError> for AppError {
    fn from(e: StreamError) -> Self {
        Self(e)
    }
}

impl From<classcast_common::Error> for AppError {
    fn from(e: classcast_common::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "server error in handler");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}
