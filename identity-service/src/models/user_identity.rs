//! External identity model - links from delegated (OAuth) providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Supported external identity providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentProvider {
    Google,
}

impl IdentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentProvider::Google => "google",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "google" => Some(IdentProvider::Google),
            _ => None,
        }
    }
}

/// External identity entity.
#[derive(Debug, Clone, FromRow)]
pub struct UserIdentity {
    pub identity_id: Uuid,
    pub user_id: Uuid,
    pub provider_code: String,
    pub subject_text: String,
    pub created_utc: DateTime<Utc>,
}

impl UserIdentity {
    /// Create a new identity link.
    pub fn new(user_id: Uuid, provider: &IdentProvider, subject: String) -> Self {
        Self {
            identity_id: Uuid::new_v4(),
            user_id,
            provider_code: provider.as_str().to_string(),
            subject_text: subject,
            created_utc: Utc::now(),
        }
    }
}
