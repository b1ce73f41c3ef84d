//! API key issuance, revocation, and validation handlers.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::TenantContext;
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 128))]
    pub key_name: String,
    pub scopes: Vec<String>,
    pub expiry_utc: Option<DateTime<Utc>>,
}

/// The raw secret appears here once and is not recoverable afterwards.
#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub key_id: Uuid,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateApiKeyRequest {
    pub api_key: String,
    pub scope: String,
    /// Tenant asserted by the calling service, if any. A key from a
    /// different tenant fails with a permission error.
    pub tenant_id: Option<Uuid>,
}

/// Identity established by a valid API key.
#[derive(Debug, Serialize)]
pub struct ValidateApiKeyResponse {
    pub key_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub scope_codes: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a scoped API key for the calling user.
///
/// POST /auth/apikeys
pub async fn create_api_key(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), AppError> {
    req.validate()?;

    let created = state
        .api_keys
        .create(
            ctx.tenant_id,
            ctx.user_id,
            req.key_name,
            req.scopes,
            req.expiry_utc,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            key_id: created.key_id,
            api_key: created.raw_secret,
        }),
    ))
}

/// Revoke an API key. Idempotent.
///
/// DELETE /auth/apikeys/:key_id
pub async fn revoke_api_key(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(key_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.api_keys.revoke(ctx.tenant_id, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Validate an API key against a requested scope.
///
/// POST /auth/apikeys/validate
pub async fn validate_api_key(
    State(state): State<AppState>,
    Json(req): Json<ValidateApiKeyRequest>,
) -> Result<Json<ValidateApiKeyResponse>, AppError> {
    let key = state
        .api_keys
        .validate(&req.api_key, &req.scope, req.tenant_id)
        .await?;

    Ok(Json(ValidateApiKeyResponse {
        key_id: key.key_id,
        tenant_id: key.tenant_id,
        user_id: key.user_id,
        scope_codes: key.scope_codes,
    }))
}
