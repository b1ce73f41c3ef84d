//! Transient one-time codes, delivered out-of-band.
//!
//! Independent of TOTP. Records are keyed by (identity, purpose) and
//! live only in the shared cache: a hashed code with a short TTL and a
//! bounded attempt budget. Consumption is atomic, so a code can be spent
//! at most once no matter how many calls race.

use crate::config::SecurityConfig;
use crate::models::OtpPurpose;
use crate::services::{Cache, OtpDelivery, RateAction, RateLimiter};
use rand::Rng;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const OTP_DIGITS: usize = 6;
pub const OTP_TTL_SECONDS: i64 = 300;
const OTP_MAX_ATTEMPTS: i64 = 5;

#[derive(Clone)]
pub struct OtpEngine {
    cache: Arc<dyn Cache>,
    delivery: Arc<dyn OtpDelivery>,
    rate_limiter: RateLimiter,
    pepper: String,
}

impl OtpEngine {
    pub fn new(
        cache: Arc<dyn Cache>,
        delivery: Arc<dyn OtpDelivery>,
        rate_limiter: RateLimiter,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            cache,
            delivery,
            rate_limiter,
            pepper: security.token_hash_pepper.clone(),
        }
    }

    fn code_key(identity: &str, purpose: &OtpPurpose) -> String {
        format!("otp:{}:{}", purpose.as_str(), identity)
    }

    fn attempts_key(identity: &str, purpose: &OtpPurpose) -> String {
        format!("otp:{}:{}:attempts", purpose.as_str(), identity)
    }

    fn hash_code(&self, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate and dispatch a code. Rate-limited before generation so
    /// delivery cost is bounded under abuse. A re-send replaces any
    /// earlier live code for the same (identity, purpose).
    #[tracing::instrument(skip(self), fields(purpose = purpose.as_str()))]
    pub async fn send_otp(&self, identity: &str, purpose: &OtpPurpose) -> Result<(), AppError> {
        let identity = identity.trim().to_lowercase();

        self.rate_limiter
            .check(RateAction::OtpSend, &identity)
            .await?;

        let code = generate_numeric_code(OTP_DIGITS);
        let code_hash = self.hash_code(&code);

        self.cache
            .set_ex(&Self::code_key(&identity, purpose), &code_hash, OTP_TTL_SECONDS)
            .await
            .map_err(AppError::InternalError)?;
        self.cache
            .set_ex(
                &Self::attempts_key(&identity, purpose),
                &OTP_MAX_ATTEMPTS.to_string(),
                OTP_TTL_SECONDS,
            )
            .await
            .map_err(AppError::InternalError)?;

        self.delivery
            .deliver(&identity, purpose, &code)
            .await
            .map_err(AppError::InternalError)?;

        tracing::info!(identity = %identity, "OTP issued");
        Ok(())
    }

    /// Verify a code. Single use: the record is consumed atomically on
    /// success. Each failed attempt burns budget; an exhausted code is
    /// deleted. Every failure mode returns the same generic error.
    #[tracing::instrument(skip(self, code), fields(purpose = purpose.as_str()))]
    pub async fn verify_otp(
        &self,
        identity: &str,
        purpose: &OtpPurpose,
        code: &str,
    ) -> Result<(), AppError> {
        let identity = identity.trim().to_lowercase();
        let code_key = Self::code_key(&identity, purpose);
        let attempts_key = Self::attempts_key(&identity, purpose);

        let Some(stored_hash) = self
            .cache
            .get(&code_key)
            .await
            .map_err(AppError::InternalError)?
        else {
            // Absent or expired.
            return Err(AppError::invalid_credentials());
        };

        let remaining = self
            .cache
            .decr(&attempts_key)
            .await
            .map_err(AppError::InternalError)?;
        if remaining < 0 {
            self.cache
                .delete(&code_key)
                .await
                .map_err(AppError::InternalError)?;
            self.cache
                .delete(&attempts_key)
                .await
                .map_err(AppError::InternalError)?;
            tracing::warn!(identity = %identity, "OTP attempt budget exhausted");
            return Err(AppError::invalid_credentials());
        }

        let presented_hash = self.hash_code(code);
        if presented_hash
            .as_bytes()
            .ct_eq(stored_hash.as_bytes())
            .unwrap_u8()
            != 1
        {
            return Err(AppError::invalid_credentials());
        }

        // Atomic consumption: only one concurrent caller sees the value.
        // The consumed value is re-checked so a code re-issued between
        // the read and this point cannot be spent by the old code.
        let consumed = self
            .cache
            .get_del(&code_key)
            .await
            .map_err(AppError::InternalError)?;
        if consumed.as_deref() != Some(presented_hash.as_str()) {
            return Err(AppError::invalid_credentials());
        }

        self.cache
            .delete(&attempts_key)
            .await
            .map_err(AppError::InternalError)?;

        tracing::info!(identity = %identity, "OTP verified");
        Ok(())
    }
}

/// Fixed-length numeric code from the OS entropy source.
fn generate_numeric_code(digits: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    (0..digits).map(|_| rng.gen_range(0..10).to_string()).collect()
}
