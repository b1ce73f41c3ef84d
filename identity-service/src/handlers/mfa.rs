//! TOTP enrollment, verification, and disable handlers.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::handlers::load_current_user;
use crate::middleware::TenantContext;
use crate::services::MfaProof;
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Pending enrollment material, shown to the user once for QR or manual
/// entry. MFA is not active until the first code verifies.
#[derive(Debug, Serialize)]
pub struct EnrollTotpResponse {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTotpRequest {
    pub code: String,
}

/// Fresh single-use backup codes. This is the only time the plaintext
/// values exist outside the caller's hands.
#[derive(Debug, Serialize)]
pub struct VerifyTotpResponse {
    pub backup_codes: Vec<String>,
}

/// Fresh proof of authentication: a password or a valid TOTP/backup
/// code. A bearer token alone is not accepted.
#[derive(Debug, Deserialize)]
pub struct DisableTotpRequest {
    pub password: Option<String>,
    pub code: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Begin TOTP enrollment for the calling user.
///
/// POST /auth/mfa/totp/enroll
pub async fn enroll_totp(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<(StatusCode, Json<EnrollTotpResponse>), AppError> {
    let user = load_current_user(&state, &ctx).await?;

    let enrollment = state.mfa.enroll_totp(&user).await?;

    Ok((
        StatusCode::OK,
        Json(EnrollTotpResponse {
            secret_base32: enrollment.secret_base32,
            provisioning_uri: enrollment.provisioning_uri,
        }),
    ))
}

/// Verify a TOTP code; confirms a pending enrollment and returns a
/// fresh backup-code batch.
///
/// POST /auth/mfa/totp/verify
pub async fn verify_totp(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<VerifyTotpRequest>,
) -> Result<Json<VerifyTotpResponse>, AppError> {
    let user = load_current_user(&state, &ctx).await?;

    let backup_codes = state.mfa.verify_totp(&user, &req.code).await?;

    Ok(Json(VerifyTotpResponse { backup_codes }))
}

/// Disable TOTP for the calling user.
///
/// POST /auth/mfa/totp/disable
pub async fn disable_totp(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<DisableTotpRequest>,
) -> Result<StatusCode, AppError> {
    let user = load_current_user(&state, &ctx).await?;

    let proof = match (req.password, req.code) {
        (Some(password), _) => MfaProof::Password(password),
        (None, Some(code)) => MfaProof::Code(code),
        (None, None) => {
            return Err(AppError::InvalidArgument(anyhow::anyhow!(
                "A password or a valid code is required"
            )));
        }
    };

    state.mfa.disable_totp(&user, proof).await?;

    Ok(StatusCode::NO_CONTENT)
}
