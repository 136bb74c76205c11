//! Error types for bggweb
//!
//! - [`FetchError`]: one outbound request (or its retries) failed
//! - [`JobError`]: a job ended fatally; the string form is stored as the job's error detail
//! - [`ApiError`]: HTTP handler errors rendered as JSON

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crate::models::TransitionError;
use serde_json::json;
use thiserror::Error;

/// Fetcher errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure, timeout or 5xx
    #[error("Network error: {0}")]
    Network(String),

    /// Remote throttling (HTTP 429)
    #[error("Rate limited by remote service")]
    RateLimited,

    /// Response did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Cancellation token fired while waiting
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Network and rate-limit failures are retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::RateLimited)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Fatal job failures
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{phase} failed: {source}")]
    Fetch {
        phase: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("Too many failed batches: {failed} (limit {limit})")]
    BatchThreshold { failed: usize, limit: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("No progress for {seconds}s; stopped by watchdog")]
    Stalled { seconds: u64 },

    #[error("Invalid job transition: {0}")]
    Transition(#[from] TransitionError),
}

impl JobError {
    pub fn fetch(phase: &'static str, source: FetchError) -> Self {
        match source {
            FetchError::Cancelled => JobError::Cancelled,
            source => JobError::Fetch { phase, source },
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Storage(err.to_string())
    }
}

impl From<bggweb_common::Error> for JobError {
    fn from(err: bggweb_common::Error) -> Self {
        JobError::Storage(err.to_string())
    }
}

/// Reasons a job request is refused
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Invalid(String),

    #[error("Job {0} is already running")]
    Busy(uuid::Uuid),

    #[error(transparent)]
    Storage(#[from] bggweb_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a job is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Common error: {0}")]
    Common(#[from] bggweb_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Database(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                err.to_string(),
            ),
            ApiError::Common(bggweb_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(bggweb_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(msg) => ApiError::BadRequest(msg),
            err @ SubmitError::Busy(_) => ApiError::Conflict(err.to_string()),
            SubmitError::Storage(err) => ApiError::Common(err),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
