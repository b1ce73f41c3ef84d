use identity_service::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        ApiKeyManager, Cache, Database, GoogleProvider, LogOtpDelivery, MfaEngine, OAuthBroker,
        OAuthProvider, OtpEngine, RateLimiter, RedisCache, TokenIssuer,
    },
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid.
    let config = AuthConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    // Shared stores: everything mutable lives here, never in-process.
    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::InternalError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::InternalError(anyhow::anyhow!(e)))?;
    let database = Database::new(pool);

    let cache: Arc<dyn Cache> = Arc::new(RedisCache::new(&config.redis).await?);
    tracing::info!("Cache initialized");

    let jwt = TokenIssuer::new(&config.jwt, &config.security)?;
    tracing::info!("Token issuer initialized");

    let rate_limiter = RateLimiter::new(cache.clone(), config.rate_limit.clone());
    let mfa = MfaEngine::new(database.clone(), config.mfa.totp_issuer.clone());
    let otp = OtpEngine::new(
        cache.clone(),
        Arc::new(LogOtpDelivery),
        rate_limiter.clone(),
        &config.security,
    );
    let api_keys = ApiKeyManager::new(database.clone(), &config.security);

    let providers: Vec<Arc<dyn OAuthProvider>> =
        vec![Arc::new(GoogleProvider::new(&config.oauth)?)];
    let oauth = OAuthBroker::new(
        database.clone(),
        cache.clone(),
        jwt.clone(),
        providers,
        config.jwt.oauth_state_expiry_minutes,
    );

    let state = AppState {
        config: config.clone(),
        db: database,
        cache,
        jwt,
        rate_limiter,
        mfa,
        otp,
        api_keys,
        oauth,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
