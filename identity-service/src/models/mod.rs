pub mod api_key;
pub mod mfa;
pub mod refresh_session;
pub mod tenant;
pub mod user;
pub mod user_identity;

pub use api_key::ApiKey;
pub use mfa::{BackupCode, MfaCredential, OtpPurpose};
pub use refresh_session::RefreshSession;
pub use tenant::{Tenant, TenantState};
pub use user::{User, UserResponse, UserState};
pub use user_identity::{IdentProvider, UserIdentity};
