//! HTTP boundary error mapping.
//!
//! MDM clients ignore response bodies on failure; the protocol signals
//! errors through the HTTP status alone, so bodies are plain status text.
//! The detailed cause is only logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error as ThisError;

use domain::Error;

/// Wrapper adapting the core error taxonomy to HTTP responses.
#[derive(Debug, ThisError)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidEnrollment(_) => StatusCode::BAD_REQUEST,
            Error::MissingCert => StatusCode::BAD_REQUEST,
            Error::Parse { .. } => StatusCode::BAD_REQUEST,
            Error::Unbound => StatusCode::UNAUTHORIZED,
            Error::ForbiddenCertMismatch => StatusCode::FORBIDDEN,
            Error::HttpStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self.0 {
            Error::Parse { content, .. } => {
                tracing::warn!(
                    error = %self.0,
                    content = %String::from_utf8_lossy(content),
                    "request rejected"
                );
            }
            Error::HttpStatus {
                status: requested, ..
            } => {
                tracing::warn!(error = %self.0, http_status = requested, "request rejected");
            }
            Error::Storage(_) => {
                tracing::error!(error = %self.0, "request failed");
            }
            _ => {
                tracing::warn!(error = %self.0, "request rejected");
            }
        }

        let body = status.canonical_reason().unwrap_or("error").to_string();
        (status, body).into_response()
    }
}
