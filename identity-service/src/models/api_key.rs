//! API key model - long-lived scoped credentials.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// API key entity. Holds only the peppered hash of the secret; the raw
/// value is returned to the caller exactly once, at creation.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub key_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub key_name: String,
    pub key_hash_text: String,
    pub scope_codes: Vec<String>,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl ApiKey {
    /// Create a new API key record.
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        key_name: String,
        key_hash: String,
        scope_codes: Vec<String>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            key_name,
            key_hash_text: key_hash,
            scope_codes,
            expiry_utc,
            revoked_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expiry_utc, Some(expiry) if expiry <= Utc::now())
    }

    /// Check if key is usable (not revoked, not expired).
    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }
}
