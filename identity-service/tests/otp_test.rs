//! Transient OTP send/verify over the HTTP surface.
//!
//! The engine itself is covered by unit tests; this exercises the
//! routes, DTO validation, and the delivery seam end to end.

mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp};
use identity_service::models::OtpPurpose;
use uuid::Uuid;

#[tokio::test]
async fn test_send_then_verify_round_trip() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let identity = format!("otp-{}@example.com", Uuid::new_v4());

    let response = app
        .post_json(
            &router,
            "/auth/otp/send",
            serde_json::json!({ "identity": identity, "purpose": "login" }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["expires_in"], 300);

    let code = app
        .otp_delivery
        .last_code(&identity, &OtpPurpose::Login)
        .expect("code delivered through the seam");

    let response = app
        .post_json(
            &router,
            "/auth/otp/verify",
            serde_json::json!({ "identity": identity, "purpose": "login", "code": code }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["verified"], true);

    // Spent: the same code cannot verify twice.
    let response = app
        .post_json(
            &router,
            "/auth/otp/verify",
            serde_json::json!({ "identity": identity, "purpose": "login", "code": code }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_identity_rejected_without_side_effects() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let response = app
        .post_json(
            &router,
            "/auth/otp/send",
            serde_json::json!({ "identity": "not-an-email", "purpose": "login" }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing went out through the delivery seam.
    assert!(app.otp_delivery.sent.lock().unwrap().is_empty());
}
