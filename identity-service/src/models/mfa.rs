//! MFA models - TOTP credentials, backup codes, transient OTP purposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// TOTP credential entity. Unconfirmed rows are pending enrollments and
/// never satisfy a second-factor requirement.
#[derive(Debug, Clone, FromRow)]
pub struct MfaCredential {
    pub credential_id: Uuid,
    pub user_id: Uuid,
    pub secret_base32: String,
    pub confirmed_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl MfaCredential {
    /// Create a pending (unconfirmed) enrollment.
    pub fn new_pending(user_id: Uuid, secret_base32: String) -> Self {
        Self {
            credential_id: Uuid::new_v4(),
            user_id,
            secret_base32,
            confirmed_utc: None,
            last_used_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_utc.is_some()
    }
}

/// Single-use backup code entity (hash only).
#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub code_id: Uuid,
    pub user_id: Uuid,
    pub code_hash_text: String,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BackupCode {
    pub fn new(user_id: Uuid, code_hash: String) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            user_id,
            code_hash_text: code_hash,
            consumed_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }
}

/// Purposes a transient OTP can be issued for. Each (identity, purpose)
/// pair holds at most one live code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    VerifyEmail,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::VerifyEmail => "verify_email",
            OtpPurpose::ResetPassword => "reset_password",
        }
    }
}
