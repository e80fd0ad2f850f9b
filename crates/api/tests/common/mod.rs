//! Common test utilities for integration tests.
//!
//! Drives the app in-process against the in-memory store, so no database
//! or TLS terminator is needed.

// Allow dead code in this module - these are helper utilities that may not
// be used by every integration test file.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, Response, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use tower::ServiceExt;

use aspen_mdm_api::app::create_app;
use aspen_mdm_api::config::Config;
use domain::store::InMemoryStore;

pub const CHECKIN_CONTENT_TYPE: &str = "application/x-apple-aspen-mdm-checkin";
pub const CERT_HEADER: &str = "x-ssl-client-cert";

/// Builds the app with the in-memory store and returns both.
pub fn test_app(overrides: &[(&str, &str)]) -> (Router, Arc<InMemoryStore>) {
    let config = Config::load_for_test(overrides).expect("test config");
    let store = Arc::new(InMemoryStore::new());
    let app = create_app(config, store.clone());
    (app, store)
}

/// Renders DER bytes as the URL-encoded PEM header a TLS terminator sends.
pub fn cert_header_value(der: &[u8]) -> String {
    let pem = format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
        STANDARD.encode(der)
    );
    pem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

/// Sends one request through the router.
pub async fn send(
    app: &Router,
    method: &str,
    path: &str,
    content_type: &str,
    cert_der: Option<&[u8]>,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(CONTENT_TYPE, content_type);
    if let Some(der) = cert_der {
        builder = builder.header(CERT_HEADER, cert_header_value(der));
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body)).expect("request");
    app.clone().oneshot(request).await.expect("response")
}

/// Posts a check-in plist and returns the response.
pub async fn checkin(app: &Router, cert_der: &[u8], body: Vec<u8>) -> Response<Body> {
    send(
        app,
        "POST",
        "/mdm/checkin",
        CHECKIN_CONTENT_TYPE,
        Some(cert_der),
        &[],
        body,
    )
    .await
}

/// Posts a command report plist and returns the response.
pub async fn command(app: &Router, cert_der: &[u8], body: Vec<u8>) -> Response<Body> {
    send(
        app,
        "POST",
        "/mdm/command",
        "application/octet-stream",
        Some(cert_der),
        &[],
        body,
    )
    .await
}

/// Reads the full response body.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

/// Asserts a 200 response and returns its body.
pub async fn expect_ok(response: Response<Body>) -> Vec<u8> {
    assert_eq!(response.status(), StatusCode::OK);
    body_bytes(response).await
}

fn plist(body: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
{body}
</dict>
</plist>"#
    )
    .into_bytes()
}

pub fn authenticate_plist(udid: &str) -> Vec<u8> {
    plist(&format!(
        "<key>MessageType</key><string>Authenticate</string>\
         <key>UDID</key><string>{udid}</string>\
         <key>Topic</key><string>com.apple.mgmt.X</string>"
    ))
}

pub fn token_update_plist(udid: &str, user_id: Option<&str>, token_b64: &str) -> Vec<u8> {
    let user = user_id
        .map(|u| format!("<key>UserID</key><string>{u}</string>"))
        .unwrap_or_default();
    plist(&format!(
        "<key>MessageType</key><string>TokenUpdate</string>\
         <key>UDID</key><string>{udid}</string>{user}\
         <key>Topic</key><string>com.apple.mgmt.X</string>\
         <key>Token</key><data>{token_b64}</data>\
         <key>PushMagic</key><string>magic-1</string>"
    ))
}

pub fn results_plist(udid: &str, command_uuid: &str, status: &str) -> Vec<u8> {
    let uuid_key = if command_uuid.is_empty() {
        String::new()
    } else {
        format!("<key>CommandUUID</key><string>{command_uuid}</string>")
    };
    plist(&format!(
        "<key>UDID</key><string>{udid}</string>{uuid_key}\
         <key>Status</key><string>{status}</string>"
    ))
}

pub fn command_plist(uuid: &str, request_type: &str) -> Vec<u8> {
    plist(&format!(
        "<key>CommandUUID</key><string>{uuid}</string>\
         <key>Command</key><dict>\
         <key>RequestType</key><string>{request_type}</string>\
         </dict>"
    ))
}
