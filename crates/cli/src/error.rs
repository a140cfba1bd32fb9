//! HTTP error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mcda_pipeline::{PipelineError, Stage};
use serde::Serialize;
use tracing::error;

/// JSON error returned by every endpoint: `{ "error", "stage", "message" }`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
    message: String,
}

impl ApiError {
    pub fn bad_request(stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_request",
            stage,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "unauthorized",
            stage: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(stage = %err.stage(), code = err.code(), error = %err, "request failed");
        }

        Self {
            status,
            error: err.code(),
            stage: Some(err.stage()),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ApiError = PipelineError::invalid(Stage::Overlay, "missing weight").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error, "invalid_request");

        let err: ApiError = PipelineError::storage(Stage::Store, "disk full").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error, "storage_write");
        assert!(err.message.starts_with("File upload to object store failed"));
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ApiError::unauthorized("missing bearer token")).unwrap();
        assert_eq!(body["error"], "unauthorized");
        assert!(body.get("stage").is_none());
        assert!(body.get("status").is_none());
    }
}
