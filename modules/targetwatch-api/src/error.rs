use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use targetwatch_common::TargetWatchError;

/// Handler error rendered as `{ "ok": false, "error": "..." }`.
#[derive(Debug)]
pub struct ApiError(pub TargetWatchError);

impl From<TargetWatchError> for ApiError {
    fn from(e: TargetWatchError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(TargetWatchError::Anyhow(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TargetWatchError::Validation(_) => StatusCode::BAD_REQUEST,
            TargetWatchError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({ "ok": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}
