//! Client certificate extraction.
//!
//! The TLS terminator in front of the server verifies the client
//! certificate (mutual TLS, or a CMS check of the `Mdm-Signature` header)
//! and forwards the leaf as a URL-encoded PEM block in a configurable
//! header. This middleware decodes it into request extensions; the
//! cert-auth gate downstream decides whether an absent certificate is
//! fatal.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use domain::request::Certificate;
use shared::pem::decode_cert_header;

use crate::app::AppState;
use crate::error::ApiError;

/// Decoded client certificate, stored in request extensions.
#[derive(Debug, Clone)]
pub struct ClientCert(pub Certificate);

/// Middleware decoding the forwarded client certificate header.
///
/// A missing header passes through (the gate rejects later where a
/// certificate is required); a present but undecodable header is a 400.
pub async fn client_cert(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let header = state.config.certauth.header.as_str();
    let value = req
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if let Some(value) = value {
        match decode_cert_header(&value) {
            Ok(der) => {
                req.extensions_mut()
                    .insert(ClientCert(Certificate::from_der(der)));
            }
            Err(err) => {
                tracing::warn!(error = %err, header, "undecodable client certificate header");
                return ApiError(domain::Error::MissingCert).into_response();
            }
        }
    }

    next.run(req).await
}
