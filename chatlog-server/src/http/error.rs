use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use http::header::{CONTENT_TYPE, HeaderValue};
use serde_json::json;
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::{
    query::{DecodeError, FinderError, QueryError},
    store::StoreError,
};

pub type AppResult<T> = Result<T, ApiError>;

/// How an error is written to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    /// `text/plain` message only.
    Plain,
    Problem,
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
    body: Body,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            body: Body::Problem,
        }
    }

    /// Rejected caller input, answered with a plain-text reason.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            body: Body::Plain,
            ..Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.body {
            Body::Plain => (
                self.status,
                [(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                self.message,
            )
                .into_response(),
            Body::Problem => {
                let mut problem = ProblemDetails::new(self.status, self.code, self.message);
                if let Some(details) = self.details {
                    problem = problem.with_details(details);
                }
                problem.into_response()
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let api = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", err.to_string());
        match err {
            StoreError::Timeout(timeout) => api.with_details(json!({
                "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
            })),
            StoreError::Status { status, .. } => api.with_details(json!({ "store_status": status })),
            _ => api,
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        let details = match &err {
            DecodeError::Message { index, id, reason } => {
                json!({ "record": index, "id": id, "reason": reason })
            }
            DecodeError::Bucket { index, reason } => json!({ "record": index, "reason": reason }),
        };
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "decode_failed", err.to_string())
            .with_details(details)
    }
}

impl From<FinderError> for ApiError {
    fn from(err: FinderError) -> Self {
        match err {
            FinderError::Invalid(err) => err.into(),
            FinderError::Query(err) => err.into(),
            FinderError::Decode(err) => err.into(),
        }
    }
}

impl From<http::Error> for ApiError {
    fn from(err: http::Error) -> Self {
        Self::internal_server_error(err.to_string())
    }
}
