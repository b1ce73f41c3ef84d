//! Out-of-band OTP delivery seam.
//!
//! Actual email/SMS transport is an external collaborator; this trait is
//! the boundary. The default implementation only records that a code was
//! sent (never the code itself).

use crate::models::OtpPurpose;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(
        &self,
        identity: &str,
        purpose: &OtpPurpose,
        code: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Delivery stub that hands the code off to logs-only observability.
/// The code value is never logged.
pub struct LogOtpDelivery;

#[async_trait]
impl OtpDelivery for LogOtpDelivery {
    async fn deliver(
        &self,
        identity: &str,
        purpose: &OtpPurpose,
        _code: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(identity = %identity, purpose = purpose.as_str(), "OTP dispatched");
        Ok(())
    }
}

/// Test delivery that captures sent codes.
#[derive(Default)]
pub struct MockOtpDelivery {
    pub sent: Mutex<Vec<(String, String, String)>>,
}

impl MockOtpDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last code sent to an identity for a purpose, if any.
    pub fn last_code(&self, identity: &str, purpose: &OtpPurpose) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(i, p, _)| i == identity && p == purpose.as_str())
            .map(|(_, _, code)| code.clone())
    }
}

#[async_trait]
impl OtpDelivery for MockOtpDelivery {
    async fn deliver(
        &self,
        identity: &str,
        purpose: &OtpPurpose,
        code: &str,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock delivery mutex poisoned: {}", e))?
            .push((
                identity.to_string(),
                purpose.as_str().to_string(),
                code.to_string(),
            ));
        Ok(())
    }
}
