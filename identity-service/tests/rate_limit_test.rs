//! Abuse rate limiting on the login surface.

mod common;

use axum::http::StatusCode;
use common::{default_rate_limits, login, TestApp};
use identity_service::config::RateLimitConfig;
use uuid::Uuid;

#[tokio::test]
async fn test_seventh_login_attempt_in_window_is_denied() {
    let Some(app) = TestApp::try_spawn_with_rate_limits(RateLimitConfig {
        login_attempts: 6,
        login_window_seconds: 60,
        ..default_rate_limits()
    })
    .await
    else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("hammered-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    // Six failed attempts burn the window but are ordinary 401s.
    for _ in 0..6 {
        let (status, _) = login(&app, &router, tenant.tenant_id, &email, "wrong-password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // The seventh is refused before credentials are even checked.
    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "wrong-password").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Correct credentials do not bypass the limiter.
    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_limit_is_per_identity() {
    let Some(app) = TestApp::try_spawn_with_rate_limits(RateLimitConfig {
        login_attempts: 6,
        login_window_seconds: 60,
        ..default_rate_limits()
    })
    .await
    else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let victim = format!("victim-{}@example.com", Uuid::new_v4());
    let bystander = format!("bystander-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &victim, "s3cure-Passw0rd!")
        .await;
    app.create_user(tenant.tenant_id, &bystander, "s3cure-Passw0rd!")
        .await;

    for _ in 0..7 {
        let _ = login(&app, &router, tenant.tenant_id, &victim, "wrong-password").await;
    }
    let (status, _) = login(&app, &router, tenant.tenant_id, &victim, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different identity is unaffected.
    let (status, _) = login(
        &app,
        &router,
        tenant.tenant_id,
        &bystander,
        "s3cure-Passw0rd!",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_window_expiry_readmits() {
    let Some(app) = TestApp::try_spawn_with_rate_limits(RateLimitConfig {
        login_attempts: 1,
        login_window_seconds: 1,
        ..default_rate_limits()
    })
    .await
    else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("patient-{}@example.com", Uuid::new_v4());
    app.create_user(tenant.tenant_id, &email, "s3cure-Passw0rd!")
        .await;

    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let (status, _) = login(&app, &router, tenant.tenant_id, &email, "s3cure-Passw0rd!").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_denial_carries_retry_after() {
    let Some(app) = TestApp::try_spawn_with_rate_limits(RateLimitConfig {
        login_attempts: 1,
        login_window_seconds: 60,
        ..default_rate_limits()
    })
    .await
    else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let email = format!("retry-{}@example.com", Uuid::new_v4());

    let _ = login(&app, &router, tenant.tenant_id, &email, "whatever").await;

    let response = app
        .post_json(
            &router,
            "/auth/login",
            serde_json::json!({
                "tenant_id": tenant.tenant_id,
                "email": email,
                "password": "whatever",
            }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("60")
    );
}
