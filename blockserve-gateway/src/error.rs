//! Request-level errors
//!
//! Everything here is decided before a streaming session starts, so it can
//! still be reported as an HTTP status. Failures after the headers are
//! committed are [`crate::session::SessionError`]s instead.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use blockserve_core::error::BlockServeError;
use blockserve_core::range::unsatisfied_content_range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    /// Valid syntax but outside the file, or not one of the supported forms
    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("{0}")]
    Internal(String),

    /// Requested block is not part of the granted file. Answered with an
    /// empty body.
    #[error("Block not available")]
    BlockUnavailable,
}

impl AccessError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AccessError::Forbidden(_) => StatusCode::FORBIDDEN,
            AccessError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            AccessError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AccessError::BlockUnavailable => StatusCode::BAD_REQUEST,
        }
    }

    pub fn token_not_found() -> Self {
        AccessError::Forbidden("Access token not found".to_string())
    }

    pub fn operation_mismatch() -> Self {
        AccessError::Forbidden("Operation does not match access token.".to_string())
    }

    pub fn bad_repo() -> Self {
        AccessError::BadRequest("Bad repo id".to_string())
    }

    pub fn missing_key() -> Self {
        AccessError::BadRequest(
            "Repo is encrypted. Please provide password to view it.".to_string(),
        )
    }

    pub fn invalid_file() -> Self {
        AccessError::BadRequest("Invalid file id".to_string())
    }

    pub fn internal() -> Self {
        AccessError::Internal("Internal server error".to_string())
    }
}

impl From<BlockServeError> for AccessError {
    fn from(err: BlockServeError) -> Self {
        tracing::error!(error = %err, "Catalog or storage lookup failed");
        AccessError::internal()
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AccessError::RangeNotSatisfiable { size } => (
                status,
                [(header::CONTENT_RANGE, unsatisfied_content_range(size))],
            )
                .into_response(),
            AccessError::BlockUnavailable => status.into_response(),
            other => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("{}\n", other),
            )
                .into_response(),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_is_message_line() {
        let response = AccessError::bad_repo().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Bad repo id\n");
    }

    #[tokio::test]
    async fn test_unavailable_block_has_empty_body() {
        let response = AccessError::BlockUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_range_not_satisfiable_discloses_size() {
        let response = AccessError::RangeNotSatisfiable { size: 1234 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1234"
        );
    }

    #[test]
    fn test_storage_errors_become_internal() {
        let err: AccessError = BlockServeError::Storage("disk gone".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }
}
