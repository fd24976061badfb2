//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<workyard_core::Error> for ApiError {
    fn from(err: workyard_core::Error) -> Self {
        match err {
            workyard_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            workyard_core::Error::InvalidState(msg) | workyard_core::Error::InvalidInput(msg) => {
                ApiError::BadRequest(msg)
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
