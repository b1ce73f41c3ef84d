//! User model - tenant-scoped user accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User state codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Active,
    Suspended,
    Deactivated,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::Active => "active",
            UserState::Suspended => "suspended",
            UserState::Deactivated => "deactivated",
        }
    }
}

/// User entity (tenant-scoped).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub role_codes: Vec<String>,
    pub email_verified: bool,
    pub user_state_code: String,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user.
    pub fn new(
        tenant_id: Uuid,
        email: String,
        password_hash: String,
        display_name: Option<String>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            password_hash,
            display_name,
            role_codes: vec!["member".to_string()],
            email_verified: false,
            user_state_code: UserState::Active.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    /// Check if user is active.
    pub fn is_active(&self) -> bool {
        self.user_state_code == UserState::Active.as_str()
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role_codes: Vec<String>,
    pub email_verified: bool,
    pub user_state_code: String,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email,
            display_name: u.display_name,
            role_codes: u.role_codes,
            email_verified: u.email_verified,
            user_state_code: u.user_state_code,
            created_utc: u.created_utc,
        }
    }
}
