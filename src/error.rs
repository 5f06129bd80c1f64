//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::storage::StorageError;

pub const PROFILE_NOT_FOUND: &str = "Profile not found";

#[derive(Debug)]
pub enum ApiError {
    MissingPayload,
    InvalidPayload(String),
    BadRequest(String),
    ProfileNotFound,
    NotFound(String),
    PayloadTooLarge,
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingPayload => {
                (StatusCode::BAD_REQUEST, "Missing profile data").into_response()
            }
            ApiError::InvalidPayload(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::ProfileNotFound => (
                StatusCode::NOT_FOUND,
                JsonResponse(ErrorBody {
                    error: PROFILE_NOT_FOUND,
                }),
            )
                .into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload too large").into_response()
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidKey => ApiError::BadRequest("invalid name".into()),
            StorageError::NotFound => ApiError::NotFound("not found".into()),
            StorageError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::Internal(error.to_string())
    }
}
