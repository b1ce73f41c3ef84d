pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AuthConfig;
use crate::services::{
    ApiKeyManager, Cache, Database, MfaEngine, OAuthBroker, OtpEngine, RateLimiter, TokenIssuer,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub db: Database,
    pub cache: Arc<dyn Cache>,
    pub jwt: TokenIssuer,
    pub rate_limiter: RateLimiter,
    pub mfa: MfaEngine,
    pub otp: OtpEngine,
    pub api_keys: ApiKeyManager,
    pub oauth: OAuthBroker,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Routes requiring an authenticated tenant context.
    let protected = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/apikeys", post(handlers::api_key::create_api_key))
        .route(
            "/auth/apikeys/:key_id",
            delete(handlers::api_key::revoke_api_key),
        )
        .route("/auth/mfa/totp/enroll", post(handlers::mfa::enroll_totp))
        .route("/auth/mfa/totp/verify", post(handlers::mfa::verify_totp))
        .route("/auth/mfa/totp/disable", post(handlers::mfa::disable_totp))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/introspect", post(handlers::auth::introspect))
        .route("/auth/otp/send", post(handlers::otp::send_otp))
        .route("/auth/otp/verify", post(handlers::otp::verify_otp))
        .route(
            "/auth/apikeys/validate",
            post(handlers::api_key::validate_api_key),
        )
        .route("/auth/oauth/:provider", get(handlers::oauth::oauth_redirect))
        .route(
            "/auth/oauth/:provider/callback",
            get(handlers::oauth::oauth_callback),
        )
        .merge(protected)
        .with_state(state.clone())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|o| o.parse::<HeaderValue>().ok())
                        .collect::<Vec<HeaderValue>>(),
                )
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}

/// Service health check.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        e
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "postgres": "up",
            "cache": "up"
        }
    })))
}
