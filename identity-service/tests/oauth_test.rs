//! Delegated OAuth login against the stubbed provider.

mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp, MOCK_OAUTH_CODE};
use uuid::Uuid;

/// Start a flow and pull the state token out of the redirect.
async fn initiate(app: &TestApp, router: &axum::Router, tenant_id: Uuid) -> String {
    let response = app
        .get(
            router,
            &format!("/auth/oauth/google?tenant_id={}", tenant_id),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("redirect location");
    let state = location
        .split("state=")
        .nth(1)
        .map(|s| s.split('&').next().unwrap_or(s))
        .expect("state parameter");
    urlencoding::decode(state).unwrap().into_owned()
}

async fn callback(
    app: &TestApp,
    router: &axum::Router,
    code: &str,
    state: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .get(
            router,
            &format!(
                "/auth/oauth/google/callback?code={}&state={}",
                urlencoding::encode(code),
                urlencoding::encode(state),
            ),
        )
        .await;
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_first_delegated_login_creates_user_and_session() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let state = initiate(&app, &router, tenant.tenant_id).await;

    let (status, body) = callback(&app, &router, MOCK_OAUTH_CODE, &state).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mfa_required"], false);
    assert!(!body["tokens"]["access_token"].as_str().unwrap().is_empty());
    assert!(!body["tokens"]["refresh_token"].as_str().unwrap().is_empty());

    // A tenant-scoped user was created, email pre-verified by the
    // provider assertion.
    assert_eq!(body["user"]["tenant_id"], tenant.tenant_id.to_string());
    assert_eq!(body["user"]["email"], app.oauth_email);
    assert_eq!(body["user"]["email_verified"], true);

    let user_id = Uuid::parse_str(body["user"]["user_id"].as_str().unwrap()).unwrap();
    let sessions = app
        .state
        .db
        .count_active_sessions_for_user(user_id)
        .await
        .unwrap();
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn test_second_login_maps_to_the_same_user() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;

    let state = initiate(&app, &router, tenant.tenant_id).await;
    let (_, first) = callback(&app, &router, MOCK_OAUTH_CODE, &state).await;

    let state = initiate(&app, &router, tenant.tenant_id).await;
    let (_, second) = callback(&app, &router, MOCK_OAUTH_CODE, &state).await;

    assert_eq!(first["user"]["user_id"], second["user"]["user_id"]);
}

#[tokio::test]
async fn test_state_token_is_single_use() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let state = initiate(&app, &router, tenant.tenant_id).await;

    let (status, _) = callback(&app, &router, MOCK_OAUTH_CODE, &state).await;
    assert_eq!(status, StatusCode::OK);

    // Replaying the same state is a replay, not a second login.
    let (status, _) = callback(&app, &router, MOCK_OAUTH_CODE, &state).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forged_state_rejected_before_exchange() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let (status, _) = callback(&app, &router, MOCK_OAUTH_CODE, "forged-state-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_authorization_code_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let state = initiate(&app, &router, tenant.tenant_id).await;

    let (status, _) = callback(&app, &router, "wrong-code", &state).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let tenant = app.create_tenant().await;
    let response = app
        .get(
            &router,
            &format!("/auth/oauth/github?tenant_id={}", tenant.tenant_id),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_tenant_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };
    let router = app.router().await;

    let response = app
        .get(
            &router,
            &format!("/auth/oauth/google?tenant_id={}", Uuid::new_v4()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
