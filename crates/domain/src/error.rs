//! Core error taxonomy.
//!
//! Structured errors carry a wrapped cause; the HTTP adapter unwraps them to
//! choose a status code and enrich log context. Nothing here reaches the
//! device as a payload, the protocol signals failures through HTTP status
//! codes only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The enrollment block could not be normalized into an enrollment id.
    #[error("invalid enrollment: {0}")]
    InvalidEnrollment(String),

    /// No client certificate was supplied with an authenticated request.
    #[error("missing client certificate")]
    MissingCert,

    /// The enrollment has no certificate binding and the message kind does
    /// not permit creating one.
    #[error("certificate not bound to enrollment")]
    Unbound,

    /// The presented certificate is bound to a different enrollment.
    #[error("certificate bound to another enrollment")]
    ForbiddenCertMismatch,

    /// The request body could not be parsed as a property list. Carries the
    /// offending bytes for logging.
    #[error("parse error: {source}")]
    Parse {
        #[source]
        source: plist::Error,
        content: Vec<u8>,
    },

    /// An inner error requests a specific HTTP status at the boundary.
    #[error("http status {status}: {source}")]
    HttpStatus {
        status: u16,
        #[source]
        source: anyhow::Error,
    },

    /// An optional handler (UserAuthenticate, DeclarativeManagement,
    /// GetToken) is not configured.
    #[error("{0} not implemented")]
    NotImplemented(&'static str),

    /// Storage backend failure, passed through.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl Error {
    /// Wraps any storage-level failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Storage(anyhow::Error::new(err))
    }

    /// Wraps an error that should surface as a specific HTTP status.
    pub fn http_status<E>(status: u16, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::HttpStatus {
            status,
            source: anyhow::Error::new(err),
        }
    }
}
