//! Delegated OAuth login handlers.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::auth::{issue_session, LoginResponse};
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OAuthInitiateQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a delegated login flow: redirect to the provider with a
/// signed, short-lived state token.
///
/// GET /auth/oauth/:provider
#[tracing::instrument(skip(state), fields(tenant_id = %query.tenant_id))]
pub async fn oauth_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthInitiateQuery>,
) -> Result<Redirect, AppError> {
    let authorization_url = state.oauth.initiate(query.tenant_id, &provider).await?;
    Ok(Redirect::to(&authorization_url))
}

/// Complete a delegated login: validate state (signature, expiry,
/// single use), exchange the code, map the provider identity to a
/// local user, and issue a session exactly as password login would.
///
/// GET /auth/oauth/:provider/callback
#[tracing::instrument(skip_all)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<LoginResponse>, AppError> {
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "Provider returned an error");
        return Err(AppError::invalid_credentials());
    }

    let code = query
        .code
        .ok_or_else(|| AppError::InvalidArgument(anyhow::anyhow!("Missing authorization code")))?;
    let oauth_state = query
        .state
        .ok_or_else(|| AppError::InvalidArgument(anyhow::anyhow!("Missing state parameter")))?;

    let user = state.oauth.complete(&provider, &code, &oauth_state).await?;

    let tokens = issue_session(&state, &user).await?;

    tracing::info!(user_id = %user.user_id, provider = %provider, "Delegated login completed");

    Ok(Json(LoginResponse {
        mfa_required: false,
        user: Some(user.sanitized()),
        tokens: Some(tokens),
    }))
}
