use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::error::CoreError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    retry_after_seconds: Option<i64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<i64>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// 429 carrying how long the client should wait.
    pub fn cooling_down(message: impl Into<String>, until: OffsetDateTime) -> Self {
        let mut err = Self::rate_limited(message);
        err.retry_after_seconds = Some(seconds_until(until));
        err
    }

    /// Map an engine error onto a response. Storage faults are logged with
    /// `context` and reported without detail.
    pub fn from_core(err: CoreError, context: &'static str) -> Self {
        match err {
            CoreError::InvalidPair | CoreError::SelfRequest | CoreError::SelfBlock => {
                Self::bad_request(err.to_string())
            }
            CoreError::InvalidInput(message) => Self::bad_request(message),
            CoreError::NotAuthorized(_) | CoreError::Blocked => Self::forbidden(err.to_string()),
            CoreError::NotFound(_) => Self::not_found(err.to_string()),
            CoreError::CooldownActive { until } => Self::cooling_down(err.to_string(), until),
            CoreError::Conflict(_) => {
                tracing::warn!(error = ?err, "{}", context);
                Self::conflict("concurrent update, please retry")
            }
            CoreError::Database(_) => {
                tracing::error!(error = ?err, "{}", context);
                Self::internal(context)
            }
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::from_core(err, "internal error")
    }
}

pub(crate) fn seconds_until(until: OffsetDateTime) -> i64 {
    let remaining = until - OffsetDateTime::now_utc();
    // Round up so clients never retry a moment too early.
    let seconds = remaining.whole_seconds() + i64::from(remaining.subsec_nanoseconds() > 0);
    seconds.max(1)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            retry_after_seconds: self.retry_after_seconds,
        });
        (self.status, body).into_response()
    }
}
