//! TOTP enrollment lifecycle, backup codes, and MFA-gated login.

mod common;

use axum::http::StatusCode;
use common::{json_body, login, TestApp};
use identity_service::services::mfa::totp_for_secret;
use uuid::Uuid;

/// Walk a user through enrollment: enroll, verify the first code,
/// collect backup codes. Returns (secret, backup_codes, access_token).
async fn enroll(
    app: &TestApp,
    router: &axum::Router,
    tenant_id: Uuid,
    email: &str,
    password: &str,
) -> (String, Vec<String>, String) {
    let (_, body) = login(app, router, tenant_id, email, password).await;
    let access_token = body["tokens"]["access_token"].as_str().unwrap().to_string();

    let response = app
        .post_json(
            router,
            "/auth/mfa/totp/enroll",
            serde_json::json!({}),
            Some(&access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let enrollment = json_body(response).await;
    let secret = enrollment["secret_base32"].as_str().unwrap().to_string();
    assert!(enrollment["provisioning_uri"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));

    let code = totp_for_secret(&secret, "identity-service-test", email)
        .unwrap()
        .generate_current()
        .unwrap();

    let response = app
        .post_json(
            router,
            "/auth/mfa/totp/verify",
            serde_json::json!({ "code": code }),
            Some(&access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let backup_codes: Vec<String> = body["backup_codes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();

    (secret, backup_codes, access_token)
}

#[tokio::test]
async fn test_enrollment_confirms_and_returns_ten_distinct_backup_codes() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("mfa-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (_, backup_codes, _) =
        enroll(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;

    assert_eq!(backup_codes.len(), 10);
    let distinct: std::collections::HashSet<&String> = backup_codes.iter().collect();
    assert_eq!(distinct.len(), 10);
}

#[tokio::test]
async fn test_pending_enrollment_does_not_gate_login() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("pending-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    // Enroll but never verify: the secret stays pending.
    let (_, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    let access_token = body["tokens"]["access_token"].as_str().unwrap();
    let response = app
        .post_json(
            &router,
            "/auth/mfa/totp/enroll",
            serde_json::json!({}),
            Some(access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // An abandoned enrollment must not lock the account.
    let (status, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mfa_required"], false);
    assert!(body["tokens"]["access_token"].as_str().is_some());
}

#[tokio::test]
async fn test_enrolled_login_requires_and_accepts_totp() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("gated-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (secret, _, _) = enroll(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;

    // Password alone: mfa_required, no tokens.
    let (status, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mfa_required"], true);
    assert!(body.get("tokens").is_none());

    // Password + current code: full session.
    let code = totp_for_secret(&secret, "identity-service-test", &email)
        .unwrap()
        .generate_current()
        .unwrap();
    let response = app
        .post_json(
            &router,
            "/auth/login",
            serde_json::json!({
                "tenant_id": tenant.tenant_id,
                "email": email,
                "password": "s3cure-Passw0rd!",
                "totp_code": code,
            }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["mfa_required"], false);
    assert!(body["tokens"]["access_token"].as_str().is_some());

    // Password + wrong code: generic rejection.
    let response = app
        .post_json(
            &router,
            "/auth/login",
            serde_json::json!({
                "tenant_id": tenant.tenant_id,
                "email": email,
                "password": "s3cure-Passw0rd!",
                "totp_code": "000000",
            }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_backup_code_is_single_use() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("backup-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (_, backup_codes, _) =
        enroll(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    let code = &backup_codes[0];

    let request = serde_json::json!({
        "tenant_id": tenant.tenant_id,
        "email": email,
        "password": "s3cure-Passw0rd!",
        "totp_code": code,
    });

    // First spend succeeds.
    let response = app
        .post_json(&router, "/auth/login", request.clone(), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Second spend of the same code fails.
    let response = app.post_json(&router, "/auth/login", request, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disable_requires_fresh_proof() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("disable-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (secret, _, access_token) =
        enroll(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;

    // A bearer token without proof is not enough.
    let response = app
        .post_json(
            &router,
            "/auth/mfa/totp/disable",
            serde_json::json!({}),
            Some(&access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Wrong password is rejected.
    let response = app
        .post_json(
            &router,
            "/auth/mfa/totp/disable",
            serde_json::json!({ "password": "not-the-password" }),
            Some(&access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct password disables; login is single-factor again.
    let response = app
        .post_json(
            &router,
            "/auth/mfa/totp/disable",
            serde_json::json!({ "password": "s3cure-Passw0rd!" }),
            Some(&access_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mfa_required"], false);

    // The old secret no longer verifies anything.
    let code = totp_for_secret(&secret, "identity-service-test", &email)
        .unwrap()
        .generate_current()
        .unwrap();
    let response = app
        .post_json(
            &router,
            "/auth/login",
            serde_json::json!({
                "tenant_id": tenant.tenant_id,
                "email": email,
                "password": "s3cure-Passw0rd!",
                "totp_code": code,
            }),
            None,
        )
        .await;
    // Code is ignored for a non-enrolled account; login still works.
    assert_eq!(response.status(), StatusCode::OK);
}
