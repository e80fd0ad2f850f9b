//! Integration tests for the check-in endpoint.

mod common;

use axum::http::StatusCode;
use shared::crypto::sha256_hex;

use common::*;

const C1: &[u8] = b"der-bytes-of-cert-one";
const C2: &[u8] = b"der-bytes-of-cert-two";

#[tokio::test]
async fn test_first_enrollment() {
    let (app, store) = test_app(&[]);

    let resp = checkin(&app, C1, authenticate_plist("AAA")).await;
    assert!(expect_ok(resp).await.is_empty());

    let resp = checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;
    assert!(expect_ok(resp).await.is_empty());

    let snap = store.snapshot("AAA").expect("enrollment exists");
    assert!(snap.enabled);
    assert_eq!(snap.token_update_tally, 1);
    assert_eq!(snap.topic.as_deref(), Some("com.apple.mgmt.X"));
    assert!(store.association_times("AAA", &sha256_hex(C1)).is_some());
}

#[tokio::test]
async fn test_cert_mismatch_is_forbidden() {
    let (app, store) = test_app(&[]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;

    let resp = checkin(&app, C2, token_update_plist("AAA", None, "dDI=")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // No mutation: tally unchanged, C2 unbound.
    let snap = store.snapshot("AAA").unwrap();
    assert_eq!(snap.token_update_tally, 1);
    assert!(store.association_times("AAA", &sha256_hex(C2)).is_none());
}

#[tokio::test]
async fn test_missing_certificate_is_bad_request() {
    let (app, _store) = test_app(&[]);
    let resp = send(
        &app,
        "POST",
        "/mdm/checkin",
        CHECKIN_CONTENT_TYPE,
        None,
        &[],
        authenticate_plist("AAA"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_undecodable_certificate_header_is_bad_request() {
    let (app, _store) = test_app(&[]);
    let resp = send(
        &app,
        "POST",
        "/mdm/checkin",
        CHECKIN_CONTENT_TYPE,
        None,
        &[(CERT_HEADER, "not-a-pem-block")],
        authenticate_plist("AAA"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_garbage_body_is_bad_request() {
    let (app, _store) = test_app(&[]);
    let resp = checkin(&app, C1, b"definitely not a plist".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_channel_parent_link() {
    let (app, store) = test_app(&[]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;

    let resp = checkin(&app, C1, token_update_plist("AAA", Some("BBB"), "dDI=")).await;
    assert!(expect_ok(resp).await.is_empty());

    let snap = store.snapshot("AAA:BBB").expect("user enrollment exists");
    assert!(snap.enabled);
    // The cert binding stays on the device channel.
    assert!(store.association_times("AAA", &sha256_hex(C1)).is_some());
    assert!(store.association_times("AAA:BBB", &sha256_hex(C1)).is_none());
}

#[tokio::test]
async fn test_checkout_disables_enrollment() {
    let (app, store) = test_app(&[]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;
    assert!(store.snapshot("AAA").unwrap().enabled);

    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
<key>MessageType</key><string>CheckOut</string>
<key>UDID</key><string>AAA</string>
<key>Topic</key><string>com.apple.mgmt.X</string>
</dict>
</plist>"#
    );
    let resp = checkin(&app, C1, body.into_bytes()).await;
    assert!(expect_ok(resp).await.is_empty());
    assert!(!store.snapshot("AAA").unwrap().enabled);
}

#[tokio::test]
async fn test_user_authenticate_not_implemented() {
    let (app, _store) = test_app(&[]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;

    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
<key>MessageType</key><string>UserAuthenticate</string>
<key>UDID</key><string>AAA</string>
<key>UserID</key><string>BBB</string>
</dict>
</plist>"#
    );
    let resp = checkin(&app, C1, body.into_bytes()).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_bootstrap_token_round_trip_over_http() {
    let (app, _store) = test_app(&[]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;

    let set = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
<key>MessageType</key><string>SetBootstrapToken</string>
<key>UDID</key><string>AAA</string>
<key>BootstrapToken</key><data>YmxvYg==</data>
</dict>
</plist>"#
    );
    let resp = checkin(&app, C1, set.into_bytes()).await;
    assert!(expect_ok(resp).await.is_empty());

    let get = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
<key>MessageType</key><string>GetBootstrapToken</string>
<key>UDID</key><string>AAA</string>
</dict>
</plist>"#
    );
    let resp = checkin(&app, C1, get.into_bytes()).await;
    let body = expect_ok(resp).await;
    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains("BootstrapToken"));
    assert!(xml.contains("YmxvYg=="));
}

#[tokio::test]
async fn test_warn_only_mode_tolerates_mismatch() {
    let (app, store) = test_app(&[("certauth.warn_only", "true")]);

    checkin(&app, C1, authenticate_plist("AAA")).await;
    checkin(&app, C1, token_update_plist("AAA", None, "dDE=")).await;

    let resp = checkin(&app, C2, token_update_plist("AAA", None, "dDI=")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.snapshot("AAA").unwrap().token_update_tally, 2);
}
