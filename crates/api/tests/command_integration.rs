//! Integration tests for the command endpoint and queue semantics.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;

use domain::models::Command;
use domain::store::{CommandStore, InMemoryStore};
use domain::Request;

use common::*;

const C1: &[u8] = b"der-bytes-of-cert-one";

async fn enroll(app: &axum::Router, udid: &str) {
    let resp = checkin(app, C1, authenticate_plist(udid)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = checkin(app, C1, token_update_plist(udid, None, "dDE=")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

async fn enqueue(store: &Arc<InMemoryStore>, ids: &[&str], uuid: &str) {
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    let command = Command {
        command_uuid: uuid.into(),
        request_type: "DeviceLock".into(),
        raw: common::command_plist(uuid, "DeviceLock"),
    };
    store
        .enqueue_command(&Request::new(), &ids, &command)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_idle_poll_with_empty_queue() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;

    let before = store.snapshot("AAA").unwrap().last_seen_at;
    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    let body = expect_ok(resp).await;
    assert!(body.is_empty());

    let after = store.snapshot("AAA").unwrap().last_seen_at;
    assert!(after >= before);
}

#[tokio::test]
async fn test_queued_command_is_delivered() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;
    enqueue(&store, &["AAA"], "U1").await;

    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    let body = expect_ok(resp).await;
    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains("U1"));
    assert!(xml.contains("DeviceLock"));
}

#[tokio::test]
async fn test_reenroll_clears_queue() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;
    enqueue(&store, &["AAA"], "U1").await;

    // Re-enrollment flushes the queue and disables the enrollment.
    let resp = checkin(&app, C1, authenticate_plist("AAA")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!store.snapshot("AAA").unwrap().enabled);

    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(expect_ok(resp).await.is_empty());

    // TokenUpdate re-enables, but the queue stays empty.
    let resp = checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.snapshot("AAA").unwrap().enabled);

    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(expect_ok(resp).await.is_empty());
}

#[tokio::test]
async fn test_not_now_redelivery() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;
    enqueue(&store, &["AAA"], "U1").await;

    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(String::from_utf8(expect_ok(resp).await).unwrap().contains("U1"));

    // The NotNow report's own response skips the deferred command.
    let resp = command(&app, C1, results_plist("AAA", "U1", "NotNow")).await;
    assert!(expect_ok(resp).await.is_empty());

    // The next poll redelivers it.
    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(String::from_utf8(expect_ok(resp).await).unwrap().contains("U1"));

    // Acknowledged retires it for good.
    let resp = command(&app, C1, results_plist("AAA", "U1", "Acknowledged")).await;
    assert!(expect_ok(resp).await.is_empty());
    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(expect_ok(resp).await.is_empty());
}

#[tokio::test]
async fn test_error_report_is_terminal() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;
    enqueue(&store, &["AAA"], "U1").await;

    let resp = command(&app, C1, results_plist("AAA", "U1", "Error")).await;
    assert!(expect_ok(resp).await.is_empty());
    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(expect_ok(resp).await.is_empty());
}

#[tokio::test]
async fn test_reenroll_clears_user_channel_queue_too() {
    let (app, store) = test_app(&[]);
    enroll(&app, "AAA").await;
    let resp = checkin(&app, C1, token_update_plist("AAA", Some("BBB"), "dDI=")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    enqueue(&store, &["AAA", "AAA:BBB"], "U1").await;

    let resp = checkin(&app, C1, authenticate_plist("AAA")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = command(&app, C1, results_plist("AAA", "", "Idle")).await;
    assert!(expect_ok(resp).await.is_empty());

    let user_results = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
<key>UDID</key><string>AAA</string>
<key>UserID</key><string>BBB</string>
<key>Status</key><string>Idle</string>
</dict>
</plist>"#
    );
    let resp = command(&app, C1, user_results.into_bytes()).await;
    assert!(expect_ok(resp).await.is_empty());
}

#[tokio::test]
async fn test_unenrolled_device_cannot_poll() {
    let (app, _store) = test_app(&[]);
    let resp = command(&app, C1, results_plist("GHOST", "", "Idle")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_combined_endpoint_dispatches_on_content_type() {
    let (app, store) = test_app(&[]);

    let resp = send(
        &app,
        "POST",
        "/mdm",
        CHECKIN_CONTENT_TYPE,
        Some(C1),
        &[],
        authenticate_plist("AAA"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(
        &app,
        "POST",
        "/mdm",
        CHECKIN_CONTENT_TYPE,
        Some(C1),
        &[],
        token_update_plist("AAA", None, "dDE="),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.snapshot("AAA").unwrap().enabled);

    // Any other content type is command traffic.
    let resp = send(
        &app,
        "POST",
        "/mdm",
        "application/x-apple-aspen-mdm",
        Some(C1),
        &[],
        results_plist("AAA", "", "Idle"),
    )
    .await;
    assert!(expect_ok(resp).await.is_empty());
}
