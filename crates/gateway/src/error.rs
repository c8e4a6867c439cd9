//! HTTP error mapping for the gateway surface.
//!
//! Validation failures carry every collected problem; internal errors are
//! logged server-side and surfaced as an opaque 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// 401, no bearer token presented
    MissingToken,
    /// 403, bearer token does not match
    InvalidToken,
    /// 422 with `{"detail":{"errors":[...]}}`
    Validation(Vec<String>),
    /// 422 with a plain `{"detail": "..."}` (request-shape problems)
    Unprocessable(String),
    /// 404
    NotFound(String),
    /// 502 with the short transport error class
    Upstream(String),
    /// 500, detail stays server-side
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "missing bearer token"})),
            )
                .into_response(),
            ApiError::InvalidToken => (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "invalid token"})),
            )
                .into_response(),
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": {"errors": errors}})),
            )
                .into_response(),
            ApiError::Unprocessable(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": detail})),
            )
                .into_response(),
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({"detail": detail}))).into_response()
            }
            ApiError::Upstream(class) => (
                StatusCode::BAD_GATEWAY,
                format!("Upstream unavailable: {class}"),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

impl From<mission_common::Error> for ApiError {
    fn from(err: mission_common::Error) -> Self {
        use mission_common::Error;
        match err {
            Error::Validation(errors) => ApiError::Validation(errors),
            Error::NotFound(detail) => ApiError::NotFound(detail),
            Error::Upstream(class) => ApiError::Upstream(class),
            Error::Auth(_) => ApiError::InvalidToken,
            other => ApiError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::anyhow!(err))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}
