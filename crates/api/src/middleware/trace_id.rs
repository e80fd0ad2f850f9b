//! Request tracing middleware.
//!
//! Tags every request with an id and wraps it in a span. The completion
//! line also carries the enrollment id the MDM handlers resolved, which
//! is the label operators actually search device traffic by.

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Request ID stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Resolved enrollment id, attached to the response by the MDM handlers
/// so the completion log line can carry it.
#[derive(Debug, Clone)]
pub struct EnrollIdLabel(pub String);

/// Middleware that assigns a request ID and a request span.
///
/// An incoming `X-Request-ID` header is honored, otherwise a UUID v4 is
/// generated. The ID lands in request extensions, the response headers,
/// and the span every downstream event inherits.
pub async fn trace_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let start = std::time::Instant::now();
    let mut response = next.run(req).instrument(span).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;
    match response.extensions().get::<EnrollIdLabel>() {
        Some(EnrollIdLabel(enroll_id)) => {
            tracing::info!(
                request_id = %request_id,
                enroll_id = %enroll_id,
                status,
                duration_ms,
                "Request completed"
            );
        }
        None => {
            tracing::info!(
                request_id = %request_id,
                status,
                duration_ms,
                "Request completed"
            );
        }
    }

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), header_value);
    }

    response
}
