use axum::{
    Json,
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::DetectorError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to HTTP clients as `{"detail": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Inference timed out after {}ms", .0.as_millis())]
    InferenceTimeout(Duration),

    #[error("Field required: {0}")]
    MissingFile(&'static str),

    #[error("Invalid multipart body: {0}")]
    InvalidMultipart(String),

    #[error("Upload exceeds the configured size limit")]
    PayloadTooLarge,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidImage(_) | ApiError::InvalidMultipart(_) => StatusCode::BAD_REQUEST,
            ApiError::InferenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::MissingFile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Short label used as the `kind` attribute on error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidImage(_) => "invalid_image",
            ApiError::InferenceFailure(_) => "inference_failure",
            ApiError::InferenceTimeout(_) => "inference_timeout",
            ApiError::MissingFile(_) => "missing_file",
            ApiError::InvalidMultipart(_) => "invalid_multipart",
            ApiError::PayloadTooLarge => "payload_too_large",
        }
    }
}

impl From<DetectorError> for ApiError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::Inference(e) => ApiError::InferenceFailure(format!("{:#}", e)),
            other => ApiError::InferenceFailure(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge;
        }
        ApiError::InvalidMultipart(err.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::InvalidMultipart(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "Request rejected");
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
