use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::classifier::InferenceError;
use crate::upload::UploadRejection;

/// Everything a request can fail with. Converted to `{"error": "..."}` at the
/// request boundary; internal details are logged instead of returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] UploadRejection),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("Model not available. Please try again later.")]
    ModelUnavailable,
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error("Invalid host header")]
    InvalidHost,
    #[error("metrics encoding failed: {0}")]
    Metrics(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(rejection) => rejection.status(),
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Inference(_) | Error::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Multipart(_) | Error::InvalidHost => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to hand to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Error::Inference(_) => {
                "Failed to process image. Please ensure the file is a valid image.".to_string()
            }
            Error::Multipart(_) => "Invalid multipart form data".to_string(),
            Error::Metrics(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    fn log(&self) {
        match self {
            Error::Inference(_) | Error::Metrics(_) => {
                tracing::error!("Error processing request: {self}");
            }
            Error::Multipart(_) | Error::InvalidHost => tracing::debug!("{self}"),
            _ => {}
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}
