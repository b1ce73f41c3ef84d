//! Password login, logout, refresh rotation, and token introspection.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::TenantContext;
use crate::models::{RefreshSession, User, UserResponse};
use crate::services::RateAction;
use crate::utils::{
    hash_password, needs_rehash, password::verify_dummy, verify_password, Password,
    PasswordHashString,
};
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub tenant_id: Uuid,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    /// Second factor (TOTP or backup code) for MFA-enrolled accounts.
    pub totp_code: Option<String>,
}

/// Token pair handed to the client. The refresh token appears here
/// exactly once; the layer above this core is responsible for binding
/// it to a secure, scope-restricted transport channel.
#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPairResponse>,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub access_token: String,
}

#[derive(Debug, Serialize, Default)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Authenticate with email and password - implementation.
#[tracing::instrument(skip(state, req), fields(tenant_id = %req.tenant_id))]
pub async fn login_impl(state: &AppState, req: LoginRequest) -> Result<LoginResponse, AppError> {
    req.validate()?;

    let email = req.email.trim().to_lowercase();
    let identity = format!("{}:{}", req.tenant_id, email);
    state
        .rate_limiter
        .check(RateAction::Login, &identity)
        .await?;

    let password = Password::new(req.password);
    let user = match state
        .db
        .find_user_by_email_in_tenant(req.tenant_id, &email)
        .await?
    {
        Some(user) => user,
        None => {
            // Burn a verification so an unknown account costs the same
            // as a wrong password.
            verify_dummy(&password);
            return Err(AppError::invalid_credentials());
        }
    };

    verify_password(
        &password,
        &PasswordHashString::new(user.password_hash.clone()),
    )
    .map_err(|_| AppError::invalid_credentials())?;

    if !user.is_active() {
        return Err(AppError::invalid_credentials());
    }

    // Upgrade stale hash parameters while we hold the verified password.
    if needs_rehash(&PasswordHashString::new(user.password_hash.clone())) {
        let upgraded = hash_password(&password).map_err(AppError::InternalError)?;
        state
            .db
            .update_password_hash(user.user_id, upgraded.as_str())
            .await?;
        tracing::info!(user_id = %user.user_id, "Password hash upgraded");
    }

    if state.mfa.has_confirmed_totp(&user).await? {
        match req.totp_code.as_deref() {
            None => {
                return Ok(LoginResponse {
                    mfa_required: true,
                    user: None,
                    tokens: None,
                });
            }
            Some(code) => {
                state.mfa.verify_second_factor(&user, code).await?;
            }
        }
    }

    let tokens = issue_session(state, &user).await?;

    tracing::info!(user_id = %user.user_id, "User logged in");

    Ok(LoginResponse {
        mfa_required: false,
        user: Some(user.sanitized()),
        tokens: Some(tokens),
    })
}

/// Authenticate with email and password.
///
/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), AppError> {
    let response = login_impl(&state, req).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Revoke the presented refresh token's session.
///
/// POST /auth/logout
#[tracing::instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<LogoutRequest>,
) -> Result<StatusCode, AppError> {
    let token_hash = state.jwt.refresh_token_hash(&req.refresh_token);

    let session = state
        .db
        .find_session_by_hash(&token_hash)
        .await?
        .ok_or_else(AppError::invalid_credentials)?;

    // A token belonging to someone else is treated as invalid, not as
    // proof the session exists.
    if session.user_id != ctx.user_id {
        return Err(AppError::invalid_credentials());
    }

    if !state.db.revoke_session_by_hash(&token_hash).await? {
        return Err(AppError::invalid_credentials());
    }

    tracing::info!(user_id = %ctx.user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Rotate a refresh token - implementation.
///
/// The presented token is consumed and replaced in one atomic store
/// operation. Presenting an already-rotated token is treated as
/// evidence of theft: the call fails and, by default, every session of
/// the implicated user is revoked.
#[tracing::instrument(skip_all)]
pub async fn refresh_impl(
    state: &AppState,
    req: RefreshRequest,
) -> Result<TokenPairResponse, AppError> {
    let old_hash = state.jwt.refresh_token_hash(&req.refresh_token);

    // Rate key is derived from the token itself; a thief hammering one
    // token shares a window with its owner.
    state
        .rate_limiter
        .check(RateAction::Refresh, &old_hash[..16.min(old_hash.len())])
        .await?;

    let (new_raw, new_hash) = state.jwt.generate_refresh_token();
    let rotated = state
        .db
        .rotate_refresh_session(
            &old_hash,
            Uuid::new_v4(),
            &new_hash,
            state.jwt.refresh_token_expiry_days(),
        )
        .await?;

    let Some(new_session) = rotated else {
        return Err(handle_refresh_miss(state, &old_hash).await);
    };

    let user = state
        .db
        .find_user_by_id(new_session.user_id)
        .await?
        .ok_or_else(AppError::invalid_credentials)?;

    if !user.is_active() {
        state.db.revoke_session_by_hash(&new_hash).await?;
        return Err(AppError::invalid_credentials());
    }

    let access_token = state
        .jwt
        .generate_access_token(
            &user.user_id.to_string(),
            &user.tenant_id.to_string(),
            &user.email,
            &user.role_codes,
        )
        .map_err(AppError::InternalError)?;

    tracing::info!(user_id = %user.user_id, "Refresh token rotated");

    Ok(TokenPairResponse {
        access_token,
        refresh_token: new_raw,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.access_token_expiry_seconds(),
    })
}

/// Decide what a failed rotation means. A hash that matches a revoked
/// session is a replay of a consumed token - reuse detection fires.
async fn handle_refresh_miss(state: &AppState, old_hash: &str) -> AppError {
    match state.db.find_session_by_hash_any(old_hash).await {
        Ok(Some(session)) if session.is_revoked() => {
            tracing::warn!(
                user_id = %session.user_id,
                "Refresh token reuse detected"
            );
            if state.config.security.revoke_on_reuse {
                match state.db.revoke_all_sessions_for_user(session.user_id).await {
                    Ok(revoked) => {
                        tracing::warn!(
                            user_id = %session.user_id,
                            revoked,
                            "All sessions revoked after token reuse"
                        );
                    }
                    Err(e) => return e,
                }
            }
            AppError::invalid_credentials()
        }
        Ok(_) => AppError::invalid_credentials(),
        Err(e) => e,
    }
}

/// Rotate a refresh token.
///
/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let response = refresh_impl(&state, req).await?;
    Ok(Json(response))
}

/// Validate an access token and report its claims. Stateless: only the
/// signature and expiry are checked, never the session store.
///
/// POST /auth/introspect
pub async fn introspect(
    State(state): State<AppState>,
    Json(req): Json<IntrospectRequest>,
) -> Json<IntrospectResponse> {
    match state.jwt.validate_access_token(&req.access_token) {
        Ok(claims) => Json(IntrospectResponse {
            active: true,
            sub: Some(claims.sub),
            tenant_id: Some(claims.tenant_id),
            email: Some(claims.email),
            roles: Some(claims.roles),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            jti: Some(claims.jti),
        }),
        Err(_) => Json(IntrospectResponse::default()),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Mint a token pair and durably record the session. Shared by password
/// login and OAuth completion.
pub(crate) async fn issue_session(
    state: &AppState,
    user: &User,
) -> Result<TokenPairResponse, AppError> {
    let access_token = state
        .jwt
        .generate_access_token(
            &user.user_id.to_string(),
            &user.tenant_id.to_string(),
            &user.email,
            &user.role_codes,
        )
        .map_err(AppError::InternalError)?;

    let (refresh_raw, refresh_hash) = state.jwt.generate_refresh_token();
    let session = RefreshSession::new(
        user.tenant_id,
        user.user_id,
        refresh_hash,
        state.jwt.refresh_token_expiry_days(),
    );
    state.db.insert_refresh_session(&session).await?;

    Ok(TokenPairResponse {
        access_token,
        refresh_token: refresh_raw,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.access_token_expiry_seconds(),
    })
}
