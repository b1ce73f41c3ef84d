//! Password login flow against a live PostgreSQL.

mod common;

use axum::http::StatusCode;
use common::{json_body, login, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn test_successful_login_issues_tokens_and_one_session() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("alice-{}@example.com", Uuid::new_v4());
    let user = app
        .create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (status, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["mfa_required"], false);
    let access_token = body["tokens"]["access_token"].as_str().unwrap();
    let refresh_token = body["tokens"]["refresh_token"].as_str().unwrap();
    assert!(!access_token.is_empty());
    assert!(!refresh_token.is_empty());
    // ~15-minute validity, reported in seconds.
    assert_eq!(body["tokens"]["expires_in"], 900);
    assert_eq!(body["user"]["user_id"], user.user_id.to_string());
    // Password hash never appears in responses.
    assert!(body["user"].get("password_hash").is_none());

    // Exactly one session row exists for that user.
    let sessions = app
        .state
        .db
        .count_active_sessions_for_user(user.user_id)
        .await
        .unwrap();
    assert_eq!(sessions, 1);

    // Its stored hash matches the issued token, and is not the raw value.
    let token_hash = app.state.jwt.refresh_token_hash(refresh_token);
    let session = app
        .state
        .db
        .find_session_by_hash(&token_hash)
        .await
        .unwrap()
        .expect("session recorded by hash");
    assert_eq!(session.user_id, user.user_id);
    assert_eq!(session.tenant_id, tenant.tenant_id);
    assert_ne!(session.token_hash_text, refresh_token);
}

#[tokio::test]
async fn test_each_login_creates_a_distinct_session() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("bob-{}@example.com", Uuid::new_v4());
    let user = app
        .create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (_, first) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    let (_, second) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;

    assert_ne!(
        first["tokens"]["refresh_token"],
        second["tokens"]["refresh_token"]
    );

    let sessions = app
        .state
        .db
        .count_active_sessions_for_user(user.user_id)
        .await
        .unwrap();
    assert_eq!(sessions, 2);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_fail_alike() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("carol-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (wrong_status, wrong_body) =
        login(&app, &router, tenant.tenant_id, &email, "not-the-password").await;
    let (unknown_status, unknown_body) = login(
        &app,
        &router,
        tenant.tenant_id,
        "nobody@example.com",
        "not-the-password",
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    // Identical message: no account enumeration.
    assert_eq!(wrong_body["error"], unknown_body["error"]);
}

#[tokio::test]
async fn test_login_is_tenant_scoped() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant_a = app.create_tenant().await;
    let tenant_b = app.create_tenant().await;
    let email = format!("dave-{}@example.com", Uuid::new_v4());
    app.create_user(tenant_a.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    // Same credentials presented under the wrong tenant fail.
    let (status, _) = login(&app, &router, tenant_b.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_suspended_user_cannot_login() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("eve-{}@example.com", Uuid::new_v4());
    let user = app
        .create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    sqlx::query("UPDATE users SET user_state_code = 'suspended' WHERE user_id = $1")
        .bind(user.user_id)
        .execute(app.state.db.pool())
        .await
        .unwrap();

    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_introspect_accepts_live_token_and_rejects_garbage() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("frank-{}@example.com", Uuid::new_v4());
    let user = app
        .create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (_, body) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    let access_token = body["tokens"]["access_token"].as_str().unwrap();

    let response = app
        .post_json(
            &router,
            "/auth/introspect",
            serde_json::json!({ "access_token": access_token }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let claims = json_body(response).await;
    assert_eq!(claims["active"], true);
    assert_eq!(claims["sub"], user.user_id.to_string());
    assert_eq!(claims["tenant_id"], tenant.tenant_id.to_string());

    let response = app
        .post_json(
            &router,
            "/auth/introspect",
            serde_json::json!({ "access_token": "not.a.token" }),
            None,
        )
        .await;
    let claims = json_body(response).await;
    assert_eq!(claims["active"], false);
}
