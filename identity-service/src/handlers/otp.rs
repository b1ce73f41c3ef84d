//! Transient OTP send/verify handlers.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::OtpPurpose;
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SendOtpRequest {
    /// Out-of-band destination the code is tied to (email address).
    #[validate(email)]
    pub identity: String,
    pub purpose: OtpPurpose,
}

#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email)]
    pub identity: String,
    pub purpose: OtpPurpose,
    #[validate(length(min = 1))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Generate and dispatch a one-time code.
///
/// POST /auth/otp/send
pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> Result<(StatusCode, Json<SendOtpResponse>), AppError> {
    req.validate()?;

    state.otp.send_otp(&req.identity, &req.purpose).await?;

    Ok((
        StatusCode::OK,
        Json(SendOtpResponse {
            expires_in: crate::services::otp::OTP_TTL_SECONDS,
        }),
    ))
}

/// Verify a one-time code. Single use; attempts are bounded.
///
/// POST /auth/otp/verify
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, AppError> {
    req.validate()?;

    state
        .otp
        .verify_otp(&req.identity, &req.purpose, &req.code)
        .await?;

    Ok(Json(VerifyOtpResponse { verified: true }))
}
