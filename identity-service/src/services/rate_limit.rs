//! Abuse rate limiting over the shared cache.
//!
//! Counters are keyed by (action, identity) and live entirely in the
//! cache with window-driven expiry, so every service instance sees the
//! same counts.

use crate::config::RateLimitConfig;
use crate::services::Cache;
use service_core::error::AppError;
use std::sync::Arc;

/// Actions with their own thresholds and windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    Login,
    OtpSend,
    Refresh,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::Login => "login",
            RateAction::OtpSend => "otp_send",
            RateAction::Refresh => "refresh",
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    fn quota(&self, action: RateAction) -> (u32, i64) {
        match action {
            RateAction::Login => (
                self.config.login_attempts,
                self.config.login_window_seconds,
            ),
            RateAction::OtpSend => (
                self.config.otp_send_attempts,
                self.config.otp_send_window_seconds,
            ),
            RateAction::Refresh => (
                self.config.refresh_attempts,
                self.config.refresh_window_seconds,
            ),
        }
    }

    /// Admit or deny one occurrence of `action` by `identity`.
    ///
    /// The increment and the window expiry are one atomic cache
    /// operation; concurrent requests from the same actor cannot race
    /// past the threshold.
    pub async fn check(&self, action: RateAction, identity: &str) -> Result<(), AppError> {
        let (limit, window_seconds) = self.quota(action);
        let key = format!("ratelimit:{}:{}", action.as_str(), identity);

        let count = self
            .cache
            .incr_with_window(&key, window_seconds)
            .await
            .map_err(AppError::InternalError)?;

        if count > i64::from(limit) {
            tracing::warn!(
                action = action.as_str(),
                count,
                limit,
                "Rate limit exceeded"
            );
            return Err(AppError::ResourceExhausted(
                "Too many requests. Please try again later.".to_string(),
                Some(window_seconds.max(0) as u64),
            ));
        }

        Ok(())
    }
}
