//! Refresh session model - one row per active refresh token.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity. Holds only the peppered hash of the refresh
/// token; the raw value is never persisted.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub token_hash_text: String,
    pub expiry_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshSession {
    /// Create a new refresh session.
    pub fn new(tenant_id: Uuid, user_id: Uuid, token_hash: String, expiry_days: i64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            token_hash_text: token_hash,
            expiry_utc: Utc::now() + Duration::days(expiry_days),
            last_used_utc: None,
            revoked_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Check if session is valid (not expired, not revoked).
    pub fn is_valid(&self) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > Utc::now()
    }

    /// Check if session is revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}
