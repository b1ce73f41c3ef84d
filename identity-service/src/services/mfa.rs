//! TOTP enrollment and verification, with single-use backup codes.
//!
//! Per-user state machine: NoMfa -> PendingEnrollment -> Enrolled. An
//! enrollment that is never confirmed by a first successful code never
//! activates MFA. Backup codes are issued on confirmation and replaced
//! wholesale on every re-verification through the enrollment surface.

use argon2::{
    password_hash::{rand_core::OsRng as HashOsRng, PasswordHash, PasswordHasher,
        PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;
use service_core::error::AppError;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::models::{BackupCode, MfaCredential, User};
use crate::services::Database;
use crate::utils::{verify_password, Password, PasswordHashString};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;
/// Accepted clock skew, in steps, on either side of the current window.
const TOTP_SKEW_STEPS: u8 = 1;

const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
/// Alphabet without ambiguous characters (no I/O/0/1).
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Fresh proof of authentication required to disable MFA. A stolen
/// session alone must not be able to downgrade account security.
pub enum MfaProof {
    Password(String),
    Code(String),
}

/// A started TOTP enrollment. The secret is pending until the first
/// successful verification.
#[derive(Debug)]
pub struct EnrollmentStarted {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[derive(Clone)]
pub struct MfaEngine {
    db: Database,
    totp_issuer: String,
}

impl MfaEngine {
    pub fn new(db: Database, totp_issuer: String) -> Self {
        Self { db, totp_issuer }
    }

    /// Begin TOTP enrollment: generate a secret and provisioning URI.
    /// The secret is stored pending and does not activate MFA; starting
    /// over replaces an abandoned pending enrollment.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn enroll_totp(&self, user: &User) -> Result<EnrollmentStarted, AppError> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Secret generation: {:?}", e)))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.totp_issuer.clone()),
            user.email.clone(),
        )
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("TOTP init: {}", e)))?;

        let secret_base32 = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();

        let credential = MfaCredential::new_pending(user.user_id, secret_base32.clone());
        self.db.upsert_pending_mfa_credential(&credential).await?;

        tracing::info!(user_id = %user.user_id, "TOTP enrollment started");

        Ok(EnrollmentStarted {
            secret_base32,
            provisioning_uri,
        })
    }

    /// Verify a TOTP code against the user's credential. The first
    /// success on a pending enrollment confirms it. Every success
    /// through this surface issues a fresh backup-code batch, replacing
    /// the previous set; the plaintext codes are returned exactly once.
    #[tracing::instrument(skip(self, user, code), fields(user_id = %user.user_id))]
    pub async fn verify_totp(&self, user: &User, code: &str) -> Result<Vec<String>, AppError> {
        let credential = self
            .db
            .find_mfa_credential(user.user_id)
            .await?
            .ok_or_else(AppError::invalid_credentials)?;

        if !self.check_totp_code(&credential, &user.email, code)? {
            return Err(AppError::invalid_credentials());
        }

        if credential.is_confirmed() {
            self.db.touch_mfa_credential(credential.credential_id).await?;
        } else {
            self.db.confirm_mfa_credential(credential.credential_id).await?;
            tracing::info!(user_id = %user.user_id, "TOTP enrollment confirmed");
        }

        let batch = generate_backup_codes().map_err(AppError::InternalError)?;
        let records: Vec<BackupCode> = batch
            .iter()
            .map(|(_, hash)| BackupCode::new(user.user_id, hash.clone()))
            .collect();
        self.db.replace_backup_codes(user.user_id, &records).await?;

        Ok(batch.into_iter().map(|(code, _)| code).collect())
    }

    /// Whether the user has MFA active (a confirmed credential).
    pub async fn has_confirmed_totp(&self, user: &User) -> Result<bool, AppError> {
        Ok(self
            .db
            .find_confirmed_mfa_credential(user.user_id)
            .await?
            .is_some())
    }

    /// Satisfy a second-factor requirement with a TOTP code or a backup
    /// code. Only confirmed credentials count. Failure is generic.
    #[tracing::instrument(skip(self, user, code), fields(user_id = %user.user_id))]
    pub async fn verify_second_factor(&self, user: &User, code: &str) -> Result<(), AppError> {
        if let Some(credential) = self.db.find_confirmed_mfa_credential(user.user_id).await? {
            if self.check_totp_code(&credential, &user.email, code)? {
                self.db.touch_mfa_credential(credential.credential_id).await?;
                return Ok(());
            }
        }

        self.verify_backup_code(user, code).await
    }

    /// Verify and consume a single-use backup code.
    pub async fn verify_backup_code(&self, user: &User, code: &str) -> Result<(), AppError> {
        let Ok(normalized) = normalize_backup_code(code) else {
            return Err(AppError::invalid_credentials());
        };

        let candidates = self.db.find_unconsumed_backup_codes(user.user_id).await?;
        for candidate in candidates {
            if backup_code_matches(&normalized, &candidate.code_hash_text) {
                // Atomic check-and-mark: a concurrent spend of the same
                // code leaves exactly one winner.
                if self.db.consume_backup_code(candidate.code_id).await? {
                    tracing::info!(user_id = %user.user_id, "Backup code consumed");
                    return Ok(());
                }
                return Err(AppError::invalid_credentials());
            }
        }

        Err(AppError::invalid_credentials())
    }

    /// Disable TOTP. Requires fresh proof of authentication; a session
    /// token alone is not enough.
    #[tracing::instrument(skip(self, user, proof), fields(user_id = %user.user_id))]
    pub async fn disable_totp(&self, user: &User, proof: MfaProof) -> Result<(), AppError> {
        match proof {
            MfaProof::Password(password) => {
                verify_password(
                    &Password::new(password),
                    &PasswordHashString::new(user.password_hash.clone()),
                )
                .map_err(|_| AppError::invalid_credentials())?;
            }
            MfaProof::Code(code) => {
                self.verify_second_factor(user, &code).await?;
            }
        }

        self.db.delete_mfa_for_user(user.user_id).await?;
        tracing::info!(user_id = %user.user_id, "TOTP disabled");
        Ok(())
    }

    fn check_totp_code(
        &self,
        credential: &MfaCredential,
        account: &str,
        code: &str,
    ) -> Result<bool, AppError> {
        let totp = totp_for_secret(&credential.secret_base32, &self.totp_issuer, account)
            .map_err(AppError::InternalError)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }
}

/// Build a TOTP instance for a stored base32 secret. Comparison inside
/// totp-rs is constant-time.
pub fn totp_for_secret(
    secret_base32: &str,
    issuer: &str,
    account: &str,
) -> Result<TOTP, anyhow::Error> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("Invalid TOTP secret: {:?}", e))?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW_STEPS,
        TOTP_STEP_SECONDS,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow::anyhow!("TOTP init: {}", e))
}

/// Generate a fresh backup-code batch: (formatted plaintext, hash)
/// pairs. Plaintext leaves the process exactly once, in the caller's
/// response.
pub fn generate_backup_codes() -> Result<Vec<(String, String)>, anyhow::Error> {
    let mut batch = Vec::with_capacity(BACKUP_CODE_COUNT);
    for _ in 0..BACKUP_CODE_COUNT {
        let normalized = random_backup_code();
        let hash = hash_backup_code(&normalized)?;
        batch.push((format_backup_code(&normalized), hash));
    }
    Ok(batch)
}

fn random_backup_code() -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    raw.iter()
        .map(|b| BACKUP_CODE_ALPHABET[usize::from(*b) % BACKUP_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalize user input: strip separators, uppercase, validate shape.
pub fn normalize_backup_code(input: &str) -> Result<String, anyhow::Error> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }
    if !normalized
        .bytes()
        .all(|b| BACKUP_CODE_ALPHABET.contains(&b))
    {
        return Err(anyhow::anyhow!("invalid backup code characters"));
    }

    Ok(normalized)
}

/// Group a normalized code for display: XXXX-XXXX-XXXX.
fn format_backup_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("-")
}

fn hash_backup_code(normalized: &str) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut HashOsRng);
    Ok(Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash backup code: {}", e))?
        .to_string())
}

/// Check a normalized code against a stored hash.
pub fn backup_code_matches(normalized: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    #[test]
    fn test_code_accepted_within_adjacent_windows() {
        let totp = totp_for_secret(TEST_SECRET, "identity-service", "user@example.com")
            .expect("totp");

        let t: u64 = 1_700_000_000;
        let code = totp.generate(t);

        assert!(totp.check(&code, t));
        assert!(totp.check(&code, t + 30), "one step ahead is tolerated");
        assert!(totp.check(&code, t.saturating_sub(30)), "one step behind is tolerated");
    }

    #[test]
    fn test_code_rejected_two_or_more_steps_away() {
        let totp = totp_for_secret(TEST_SECRET, "identity-service", "user@example.com")
            .expect("totp");

        let t: u64 = 1_700_000_000;
        let code = totp.generate(t);

        assert!(!totp.check(&code, t + 60));
        assert!(!totp.check(&code, t - 60));
    }

    #[test]
    fn test_provisioning_uri_carries_issuer_and_account() {
        let totp = totp_for_secret(TEST_SECRET, "identity-service", "user@example.com")
            .expect("totp");

        let uri = totp.get_url();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("identity-service"));
        assert!(uri.contains("user%40example.com") || uri.contains("user@example.com"));
    }

    #[test]
    fn test_backup_code_batch_is_ten_distinct_codes() {
        let batch = generate_backup_codes().expect("batch");
        assert_eq!(batch.len(), 10);

        let distinct: HashSet<&String> = batch.iter().map(|(code, _)| code).collect();
        assert_eq!(distinct.len(), 10, "no repeats in a batch");

        for (code, hash) in &batch {
            // XXXX-XXXX-XXXX display form.
            assert_eq!(code.len(), 14);
            assert_eq!(code.matches('-').count(), 2);
            let normalized = normalize_backup_code(code).expect("round-trips");
            assert!(backup_code_matches(&normalized, hash));
        }
    }

    #[test]
    fn test_backup_code_normalization() {
        assert_eq!(
            normalize_backup_code("abcd-efgh-jklm").expect("valid"),
            "ABCDEFGHJKLM"
        );
        assert_eq!(
            normalize_backup_code(" ABCD EFGH JKLM ").expect("valid"),
            "ABCDEFGHJKLM"
        );

        assert!(normalize_backup_code("too-short").is_err());
        // '0' and '1' are not in the alphabet.
        assert!(normalize_backup_code("0BCD-EFGH-JKL1").is_err());
    }

    #[test]
    fn test_wrong_backup_code_does_not_match() {
        let batch = generate_backup_codes().expect("batch");
        let (_, hash) = &batch[0];

        assert!(!backup_code_matches("ABCDEFGHJKLM", hash));
    }
}
