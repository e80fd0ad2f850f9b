//! Authentication middleware for the admin surface.
//!
//! The `/v1` endpoints (enqueue, push-info) are operator-facing and sit
//! behind a static API key; with no key configured the surface is
//! disabled.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::app::AppState;

/// Middleware that requires the `X-API-Key` header to match the configured
/// admin key.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin.api_key.as_deref() else {
        return forbidden_response("Admin API is disabled");
    };

    let presented = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok());
    match presented {
        Some(key) if key == expected => next.run(req).await,
        _ => unauthorized_response("Invalid or missing API key"),
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "unauthorized",
            "message": message
        })),
    )
        .into_response()
}

fn forbidden_response(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "forbidden",
            "message": message
        })),
    )
        .into_response()
}
