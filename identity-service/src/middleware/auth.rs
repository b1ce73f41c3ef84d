//! Authentication middleware and the tenant boundary it establishes.
//!
//! Every protected route runs through here: the bearer token is
//! validated (signature and expiry only; access tokens are stateless)
//! and a `TenantContext` is placed in request extensions. Downstream
//! code must filter every lookup and mutation by this context.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::services::AccessTokenClaims;
use crate::AppState;

/// The authenticated tenant/user boundary carried on every call.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
}

impl TenantContext {
    pub fn from_claims(claims: &AccessTokenClaims) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::invalid_credentials())?;
        let tenant_id = Uuid::parse_str(&claims.tenant_id)
            .map_err(|_| AppError::invalid_credentials())?;

        Ok(Self {
            user_id,
            tenant_id,
            email: claims.email.clone(),
            roles: claims.roles.clone(),
        })
    }

    /// Enforce the tenant boundary on a resource. A mismatch is a
    /// permission error, never a not-found: existence of resources in
    /// other tenants must not leak.
    pub fn ensure_tenant(&self, resource_tenant: Uuid) -> Result<(), AppError> {
        if self.tenant_id != resource_tenant {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                resource_tenant = %resource_tenant,
                "Cross-tenant access attempt"
            );
            return Err(AppError::PermissionDenied(anyhow::anyhow!(
                "Access to this resource is denied"
            )));
        }
        Ok(())
    }
}

/// Middleware requiring a valid access token.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthenticated(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state
        .jwt
        .validate_access_token(token)
        .map_err(|_| AppError::invalid_credentials())?;

    let context = TenantContext::from_claims(&claims)?;
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TenantContext>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Tenant context missing from request extensions"
            ))
        })
    }
}
