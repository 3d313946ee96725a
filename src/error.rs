//! HTTP boundary errors.
//!
//! Every handler and guard returns [`ApiError`]; its `IntoResponse` renders
//! the JSON [`ErrorResponse`] envelope.  Unclassified failures collapse into
//! [`ApiError::Unavailable`], which always renders the same message and
//! attaches the real cause as a response extension for the monitor to record.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Message returned for every upstream or system failure.
pub const UNAVAILABLE_MESSAGE: &str =
    "Our AI mentor is currently napping. Please try again in 2 minutes.";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

/// Cause of a generic 503, carried on the response so the monitor layer can
/// log it and record a system-error event without leaking it to the caller.
#[derive(Debug, Clone)]
pub struct FailureCause(pub String);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Potentially dangerous input detected")]
    SuspiciousPayload,

    #[error("Bot detected (Turnstile Verification Failed)")]
    BotCheckFailed,

    /// Safety-scan rejection; the message is already user-safe.
    #[error("{0}")]
    UnsafeContent(String),

    #[error("Too many requests. Please slow down.")]
    RateLimited,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        ApiError::Unavailable(cause.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_)
            | ApiError::SuspiciousPayload
            | ApiError::BotCheckFailed
            | ApiError::UnsafeContent(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> i32 {
        match self {
            ApiError::BadRequest(_) => 4000,
            ApiError::PayloadTooLarge => 4001,
            ApiError::Validation(_) => 4002,
            ApiError::SuspiciousPayload => 4003,
            ApiError::BotCheckFailed => 4004,
            ApiError::UnsafeContent(_) => 4005,
            ApiError::NotFound(_) => 4040,
            ApiError::Conflict(_) => 4090,
            ApiError::RateLimited => 4290,
            ApiError::Unauthorized(_) => 2001,
            ApiError::Forbidden(_) => 2003,
            ApiError::Unavailable(_) => 5030,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        let message = match self {
            ApiError::Unavailable(_) => UNAVAILABLE_MESSAGE.to_string(),
            other => other.to_string(),
        };
        ErrorResponse {
            error_code: self.error_code(),
            message,
            http_status: self.status().as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.to_body())).into_response();
        if let ApiError::Unavailable(cause) = self {
            response.extensions_mut().insert(FailureCause(cause));
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => ApiError::NotFound(entity.to_string()),
            StoreError::AlreadyExists { entity, .. } => {
                ApiError::Conflict(format!("{} already exists", entity))
            }
            other => ApiError::unavailable(format!("store: {}", other)),
        }
    }
}

/// Map axum's JSON extractor rejection to a 422 without echoing serde
/// internals beyond the rejection summary.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::BytesRejection(_) => ApiError::PayloadTooLarge,
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::BadRequest("Expected a JSON request body".into())
            }
            other => ApiError::Validation(other.body_text()),
        }
    }
}

/// Response used by the panic catcher: the generic 503 plus a cause marker.
pub fn panic_response() -> Response {
    ApiError::unavailable("handler panicked").into_response()
}
