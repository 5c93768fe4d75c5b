//! Rendezvous service error types.
//!
//! Every error maps to an HTTP status code via the `IntoResponse` impl. The
//! domain variants carry user-facing reasons ("No candidates yet") that are
//! returned verbatim. Storage and internal failures are logged server-side
//! and answered with a generic message.

use crate::ledger::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Rendezvous error type.
///
/// Maps to HTTP status codes:
/// - NotFound, InvalidCandidate: 404 Not Found
/// - Forbidden: 403 Forbidden
/// - Conflict: 409 Conflict
/// - InvalidState: 422 Unprocessable Entity
/// - Timeout: 408 Request Timeout
/// - InvalidToken: 401 Unauthorized
/// - BadRequest: 400 Bad Request
/// - Storage, Internal: 500 Internal Server Error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RvError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error")]
    Internal,
}

impl RvError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RvError::NotFound(_) | RvError::InvalidCandidate(_) => 404,
            RvError::Forbidden(_) => 403,
            RvError::Conflict(_) => 409,
            RvError::InvalidState(_) => 422,
            RvError::Timeout(_) => 408,
            RvError::InvalidToken(_) => 401,
            RvError::BadRequest(_) => 400,
            RvError::Storage(_) | RvError::Internal => 500,
        }
    }

    /// Stable machine-readable code used in error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RvError::NotFound(_) => "NOT_FOUND",
            RvError::InvalidCandidate(_) => "INVALID_CANDIDATE",
            RvError::Forbidden(_) => "FORBIDDEN",
            RvError::Conflict(_) => "CONFLICT",
            RvError::InvalidState(_) => "INVALID_STATE",
            RvError::Timeout(_) => "TIMEOUT",
            RvError::InvalidToken(_) => "INVALID_TOKEN",
            RvError::BadRequest(_) => "BAD_REQUEST",
            RvError::Storage(_) => "STORAGE_ERROR",
            RvError::Internal => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn no_candidates() -> Self {
        RvError::InvalidState("No candidates yet".to_string())
    }

    pub(crate) fn owner_only(action: &str) -> Self {
        RvError::Forbidden(format!("Only the session owner can {action}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RvError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            RvError::Storage(err) => {
                tracing::error!(target: "rv.ledger", error = %err, "Ledger operation failed");
                "An internal storage error occurred".to_string()
            }
            RvError::Internal => "An internal error occurred".to_string(),
            RvError::NotFound(reason)
            | RvError::InvalidCandidate(reason)
            | RvError::Forbidden(reason)
            | RvError::Conflict(reason)
            | RvError::InvalidState(reason)
            | RvError::Timeout(reason)
            | RvError::InvalidToken(reason)
            | RvError::BadRequest(reason) => reason.clone(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"rendezvous\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<LedgerError> for RvError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => RvError::NotFound(what),
            LedgerError::Forbidden(reason) => RvError::Forbidden(reason),
            LedgerError::UnknownCandidate => {
                RvError::InvalidCandidate("Candidate not found".to_string())
            }
            LedgerError::InvalidReference(reason) => RvError::Conflict(reason),
            LedgerError::Storage(err) => RvError::Storage(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RvError::InvalidState("No candidates yet".to_string()).to_string(),
            "Invalid state: No candidates yet"
        );
        assert_eq!(RvError::Internal.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RvError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(RvError::InvalidCandidate("x".to_string()).status_code(), 404);
        assert_eq!(RvError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(RvError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(RvError::InvalidState("x".to_string()).status_code(), 422);
        assert_eq!(RvError::Timeout("x".to_string()).status_code(), 408);
        assert_eq!(RvError::InvalidToken("x".to_string()).status_code(), 401);
        assert_eq!(RvError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(RvError::Storage("x".to_string()).status_code(), 500);
        assert_eq!(RvError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_invalid_state_keeps_reason() {
        let response = RvError::no_candidates().into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_STATE");
        assert_eq!(body["error"]["message"], "No candidates yet");
    }

    #[tokio::test]
    async fn test_into_response_storage_hides_details() {
        let response = RvError::Storage("relation \"votes\" does not exist".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "STORAGE_ERROR");
        assert_eq!(body["error"]["message"], "An internal storage error occurred");
    }

    #[tokio::test]
    async fn test_into_response_invalid_token_sets_challenge() {
        let response = RvError::InvalidToken("Malformed token".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let challenge = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("realm=\"rendezvous\""));
    }

    #[tokio::test]
    async fn test_into_response_timeout() {
        let response = RvError::Timeout("Round lease expired".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_from_ledger_error() {
        assert_eq!(
            RvError::from(LedgerError::UnknownCandidate),
            RvError::InvalidCandidate("Candidate not found".to_string())
        );
        assert_eq!(
            RvError::from(LedgerError::Forbidden("owner only".to_string())),
            RvError::Forbidden("owner only".to_string())
        );
        assert_eq!(
            RvError::from(LedgerError::Storage("boom".to_string())),
            RvError::Storage("boom".to_string())
        );
    }
}
