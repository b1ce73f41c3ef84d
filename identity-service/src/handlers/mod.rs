pub mod api_key;
pub mod auth;
pub mod mfa;
pub mod oauth;
pub mod otp;

use service_core::error::AppError;

use crate::middleware::TenantContext;
use crate::models::User;
use crate::AppState;

/// Load the calling user's row, enforcing the tenant boundary.
pub(crate) async fn load_current_user(
    state: &AppState,
    ctx: &TenantContext,
) -> Result<User, AppError> {
    let user = state
        .db
        .find_user_by_id(ctx.user_id)
        .await?
        .ok_or_else(AppError::invalid_credentials)?;

    ctx.ensure_tenant(user.tenant_id)?;

    if !user.is_active() {
        return Err(AppError::invalid_credentials());
    }

    Ok(user)
}
