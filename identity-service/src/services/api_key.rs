//! Scoped API key issuance and validation.
//!
//! The raw secret is handed out exactly once, at creation; lookups go
//! through a deterministic peppered hash. Scope evaluation is an
//! explicit prefix-wildcard matcher over the granted set.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::models::ApiKey;
use crate::services::Database;

const API_KEY_PREFIX: &str = "idk_";
const API_KEY_SECRET_BYTES: usize = 32;

/// A freshly minted key. `raw_secret` is not recoverable afterwards.
#[derive(Debug)]
pub struct CreatedApiKey {
    pub key_id: Uuid,
    pub raw_secret: String,
}

#[derive(Clone)]
pub struct ApiKeyManager {
    db: Database,
    pepper: String,
}

impl ApiKeyManager {
    pub fn new(db: Database, security: &SecurityConfig) -> Self {
        Self {
            db,
            pepper: security.token_hash_pepper.clone(),
        }
    }

    fn key_hash(&self, raw_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(raw_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Create a key for a tenant user. Returns the raw secret once.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id))]
    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        key_name: String,
        scopes: Vec<String>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKey, AppError> {
        if key_name.trim().is_empty() {
            return Err(AppError::InvalidArgument(anyhow::anyhow!(
                "Key name must not be empty"
            )));
        }
        if scopes.is_empty() {
            return Err(AppError::InvalidArgument(anyhow::anyhow!(
                "At least one scope is required"
            )));
        }
        if let Some(expiry) = expiry_utc {
            if expiry <= Utc::now() {
                return Err(AppError::InvalidArgument(anyhow::anyhow!(
                    "Expiry must be in the future"
                )));
            }
        }

        let mut secret_bytes = [0u8; API_KEY_SECRET_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let raw_secret = format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(secret_bytes));

        let key = ApiKey::new(
            tenant_id,
            user_id,
            key_name,
            self.key_hash(&raw_secret),
            scopes,
            expiry_utc,
        );
        self.db.insert_api_key(&key).await?;

        tracing::info!(key_id = %key.key_id, "API key created");

        Ok(CreatedApiKey {
            key_id: key.key_id,
            raw_secret,
        })
    }

    /// Validate a presented secret against a requested scope. When the
    /// caller asserts a tenant, a key from another tenant is a
    /// permission error, not a lookup miss.
    #[tracing::instrument(skip(self, raw_secret))]
    pub async fn validate(
        &self,
        raw_secret: &str,
        requested_scope: &str,
        asserted_tenant: Option<Uuid>,
    ) -> Result<ApiKey, AppError> {
        let key = self
            .db
            .find_api_key_by_hash(&self.key_hash(raw_secret))
            .await?
            .ok_or_else(AppError::invalid_credentials)?;

        if let Some(tenant_id) = asserted_tenant {
            if key.tenant_id != tenant_id {
                return Err(AppError::PermissionDenied(anyhow::anyhow!(
                    "Access to this resource is denied"
                )));
            }
        }

        if !key.is_valid() {
            return Err(AppError::invalid_credentials());
        }

        if !scope_allows(&key.scope_codes, requested_scope) {
            return Err(AppError::PermissionDenied(anyhow::anyhow!(
                "Insufficient scope"
            )));
        }

        Ok(key)
    }

    /// Revoke a key owned by the caller's tenant. Idempotent: revoking
    /// an already-revoked key is a no-op success.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, tenant_id: Uuid, key_id: Uuid) -> Result<(), AppError> {
        let key = self
            .db
            .find_api_key_by_id(key_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("API key not found")))?;

        // A foreign tenant's key must not be revealed as existing, but
        // acting on it is a permission error rather than a miss.
        if key.tenant_id != tenant_id {
            return Err(AppError::PermissionDenied(anyhow::anyhow!(
                "Access to this resource is denied"
            )));
        }

        self.db.revoke_api_key(key_id).await?;
        tracing::info!(key_id = %key_id, "API key revoked");
        Ok(())
    }
}

/// Decide whether a granted scope set covers a requested scope.
///
/// A grant matches exactly, or as a namespace wildcard: `files:*`
/// covers any requested scope starting with `files:`; a bare `*`
/// covers everything.
pub fn scope_allows(granted: &[String], requested: &str) -> bool {
    if requested.is_empty() {
        return false;
    }
    for grant in granted {
        if grant == "*" {
            return true;
        }
        if grant == requested {
            return true;
        }
        if let Some(prefix) = grant.strip_suffix('*') {
            if !prefix.is_empty() && requested.starts_with(prefix) {
                return true;
            }
        }
    }
    false
}
