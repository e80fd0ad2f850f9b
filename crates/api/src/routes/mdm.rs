//! The MDM protocol endpoints.
//!
//! `POST /mdm/checkin` takes check-in messages, `POST /mdm/command` takes
//! command reports, and `POST /mdm` serves both, split on `Content-Type`.
//! Responses are property-list bytes (or empty); failures surface as bare
//! HTTP statuses.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Extension,
};
use metrics::counter;

use domain::models::checkin::parse_checkin;
use domain::models::command::parse_command_results;
use domain::Request;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ClientCert, EnrollIdLabel};

/// Content type for MDM check-in messages; anything else on the combined
/// endpoint is treated as command traffic.
pub const CHECKIN_CONTENT_TYPE: &str = "application/x-apple-aspen-mdm-checkin";

fn build_request(params: HashMap<String, String>, cert: Option<ClientCert>) -> Request {
    let mut req = Request::new().with_params(params);
    if let Some(ClientCert(cert)) = cert {
        req = req.with_certificate(cert);
    }
    req
}

fn labeled(body: Vec<u8>, label: Option<EnrollIdLabel>) -> Response {
    let mut response = body.into_response();
    if let Some(label) = label {
        response.extensions_mut().insert(label);
    }
    response
}

async fn handle_checkin(state: &AppState, req: &Request, body: &[u8]) -> Result<Response, ApiError> {
    let msg = parse_checkin(body)?;
    counter!("mdm_checkin_total", "message_type" => msg.message_type()).increment(1);
    let label = msg.enrollment().resolve().ok().map(|id| EnrollIdLabel(id.id));
    let response = state.service.check_in(req, &msg).await?;
    Ok(labeled(response.unwrap_or_default(), label))
}

async fn handle_command(state: &AppState, req: &Request, body: &[u8]) -> Result<Response, ApiError> {
    let results = parse_command_results(body)?;
    counter!("mdm_command_reports_total", "status" => results.status.as_str()).increment(1);
    let label = results.enrollment.resolve().ok().map(|id| EnrollIdLabel(id.id));
    let next = state
        .service
        .command_and_report_results(req, &results)
        .await?;
    Ok(labeled(next.map(|c| c.raw).unwrap_or_default(), label))
}

/// Check-in endpoint.
pub async fn checkin(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    cert: Option<Extension<ClientCert>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = build_request(params, cert.map(|Extension(c)| c));
    handle_checkin(&state, &req, &body).await
}

/// Command/report endpoint.
pub async fn command(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    cert: Option<Extension<ClientCert>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = build_request(params, cert.map(|Extension(c)| c));
    handle_command(&state, &req, &body).await
}

/// Combined endpoint dispatching on `Content-Type`.
pub async fn combined(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    cert: Option<Extension<ClientCert>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = build_request(params, cert.map(|Extension(c)| c));
    let is_checkin = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(CHECKIN_CONTENT_TYPE));

    if is_checkin {
        handle_checkin(&state, &req, &body).await
    } else {
        handle_command(&state, &req, &body).await
    }
}
