//! Custom error types for the attendance service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Custom error type for the attendance service
///
/// Every variant except `InternalServerError` and `Database` is an expected,
/// user-facing outcome.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed, tampered or undecryptable QR token
    #[error("Invalid QR code")]
    InvalidToken,

    /// Session missing, cancelled or past its expiry
    #[error("Session is inactive, invalid or expired")]
    SessionInvalidOrExpired,

    /// Caller has no student profile
    #[error("Student profile not found")]
    ProfileNotFound,

    /// Caller is not actively enrolled in the token's course
    #[error("You are not enrolled in this course")]
    NotEnrolled,

    /// Attendance was already recorded for this session
    #[error("Attendance already marked")]
    DuplicateAttendance,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    /// Unauthorized access
    #[error("Unauthorized")]
    Unauthorized,

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] common::error::DatabaseError),
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::SessionInvalidOrExpired => "SESSION_INVALID_OR_EXPIRED",
            ApiError::ProfileNotFound => "PROFILE_NOT_FOUND",
            ApiError::NotEnrolled => "NOT_ENROLLED",
            ApiError::DuplicateAttendance => "DUPLICATE_ATTENDANCE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::InternalServerError | ApiError::Database(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidToken
            | ApiError::SessionInvalidOrExpired
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotEnrolled | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ProfileNotFound | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DuplicateAttendance | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalServerError | ApiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            ApiError::Database(e) => {
                error!("Database failure while handling request: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
