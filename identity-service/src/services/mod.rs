pub mod api_key;
pub mod cache;
pub mod database;
pub mod mfa;
pub mod notification;
pub mod oauth;
pub mod otp;
pub mod rate_limit;
pub mod token;

pub use api_key::{scope_allows, ApiKeyManager, CreatedApiKey};
pub use cache::{Cache, MemoryCache, RedisCache};
pub use database::Database;
pub use mfa::{EnrollmentStarted, MfaEngine, MfaProof};
pub use notification::{LogOtpDelivery, MockOtpDelivery, OtpDelivery};
pub use oauth::{GoogleProvider, MockProvider, OAuthBroker, OAuthProvider, ProviderIdentity};
pub use otp::OtpEngine;
pub use rate_limit::{RateAction, RateLimiter};
pub use token::{AccessTokenClaims, OAuthStateClaims, TokenIssuer};
