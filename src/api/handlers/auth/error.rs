//! Typed failures for the auth operations.
//!
//! Every operation returns either a success value or one of these kinds;
//! messages are fixed strings safe to show a caller. Store and crypto
//! failures collapse into `Internal`, which logs the source chain and
//! exposes only a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    TooManyRequests(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::TooManyRequests(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(err) => {
                error!("auth operation failed: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong")
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
