//! Delegated OAuth login against external providers.
//!
//! The state parameter is a signed, time-bound token validated
//! statelessly at the callback before anything else; single use is then
//! enforced by a set-if-absent nonce write in the shared cache. Code
//! exchange goes through the `OAuthProvider` seam so the network
//! collaborator can be stubbed.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::OAuthConfig;
use crate::models::{IdentProvider, User, UserIdentity};
use crate::services::{Cache, Database, TokenIssuer};
use crate::utils::{hash_password, Password};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Identity asserted by an external provider after code exchange.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider_code(&self) -> &'static str;

    /// Build the provider's authorization URL carrying our state token.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the provider's identity
    /// assertion. One bounded network call; never retried.
    async fn exchange_code(&self, code: &str) -> Result<ProviderIdentity, AppError>;
}

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: &OAuthConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        Ok(Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    aud: String,
    email: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn provider_code(&self) -> &'static str {
        IdentProvider::Google.as_str()
    }

    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}&prompt=select_account",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderIdentity, AppError> {
        let response = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, "Provider code exchange failed");
            return Err(AppError::invalid_credentials());
        }

        let tokens: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Provider response: {}", e)))?;

        let id_token = tokens
            .id_token
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("No ID token in response")))?;

        let claims = decode_id_token_claims(&id_token)?;
        if claims.aud != self.client_id {
            return Err(AppError::invalid_credentials());
        }

        let email = claims
            .email
            .ok_or_else(|| AppError::invalid_credentials())?;

        Ok(ProviderIdentity {
            subject: claims.sub,
            email,
            display_name: claims.name,
        })
    }
}

/// Decode ID token claims without signature verification: the token was
/// just received over TLS directly from the provider's token endpoint
/// in exchange for a single-use code.
fn decode_id_token_claims(id_token: &str) -> Result<GoogleIdTokenClaims, AppError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::invalid_credentials());
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| AppError::invalid_credentials())?;

    serde_json::from_slice::<GoogleIdTokenClaims>(&payload)
        .map_err(|_| AppError::invalid_credentials())
}

#[derive(Clone)]
pub struct OAuthBroker {
    db: Database,
    cache: Arc<dyn Cache>,
    jwt: TokenIssuer,
    providers: HashMap<&'static str, Arc<dyn OAuthProvider>>,
    state_ttl_seconds: i64,
}

impl OAuthBroker {
    pub fn new(
        db: Database,
        cache: Arc<dyn Cache>,
        jwt: TokenIssuer,
        providers: Vec<Arc<dyn OAuthProvider>>,
        state_ttl_minutes: i64,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.provider_code(), p))
            .collect();
        Self {
            db,
            cache,
            jwt,
            providers,
            state_ttl_seconds: state_ttl_minutes * 60,
        }
    }

    fn provider(&self, code: &str) -> Result<&Arc<dyn OAuthProvider>, AppError> {
        self.providers
            .get(code)
            .ok_or_else(|| AppError::InvalidArgument(anyhow::anyhow!("Unknown provider")))
    }

    /// Start a delegated login flow for a tenant. Returns the external
    /// authorization URL to redirect the user to.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(&self, tenant_id: Uuid, provider_code: &str) -> Result<String, AppError> {
        let tenant = self
            .db
            .find_tenant_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant not found")))?;
        if !tenant.is_active() {
            return Err(AppError::PermissionDenied(anyhow::anyhow!(
                "Tenant is suspended"
            )));
        }

        let provider = self.provider(provider_code)?;
        let (state, _nonce) = self
            .jwt
            .generate_oauth_state(&tenant_id.to_string(), provider_code)
            .map_err(AppError::InternalError)?;

        Ok(provider.authorization_url(&state))
    }

    /// Complete the flow: validate state, enforce single use, exchange
    /// the code, and map the provider identity to a tenant-scoped user
    /// (creating one on first login).
    #[tracing::instrument(skip(self, code, state))]
    pub async fn complete(
        &self,
        provider_code: &str,
        code: &str,
        state: &str,
    ) -> Result<User, AppError> {
        let provider = self.provider(provider_code)?;

        // Stateless checks first: signature, expiry, provider binding.
        let claims = self
            .jwt
            .validate_oauth_state(state, provider_code)
            .map_err(|_| AppError::invalid_credentials())?;

        let tenant_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::invalid_credentials())?;

        // Single use: first presentation claims the nonce, replays lose.
        let fresh = self
            .cache
            .set_nx_ex(
                &format!("oauth:state:{}", claims.nonce),
                "used",
                self.state_ttl_seconds,
            )
            .await
            .map_err(AppError::InternalError)?;
        if !fresh {
            tracing::warn!("OAuth state replay detected");
            return Err(AppError::invalid_credentials());
        }

        let identity = provider.exchange_code(code).await?;

        self.find_or_create_user(tenant_id, provider_code, &identity)
            .await
    }

    async fn find_or_create_user(
        &self,
        tenant_id: Uuid,
        provider_code: &str,
        identity: &ProviderIdentity,
    ) -> Result<User, AppError> {
        // Already-linked identity.
        if let Some(link) = self
            .db
            .find_identity_by_subject(tenant_id, provider_code, &identity.subject)
            .await?
        {
            return self
                .db
                .find_user_by_id(link.user_id)
                .await?
                .ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!("Identity points at missing user"))
                });
        }

        let provider = IdentProvider::parse(provider_code)
            .ok_or_else(|| AppError::InvalidArgument(anyhow::anyhow!("Unknown provider")))?;

        // Same email in the tenant: link the identity to that account.
        if let Some(user) = self
            .db
            .find_user_by_email_in_tenant(tenant_id, &identity.email)
            .await?
        {
            let link = UserIdentity::new(user.user_id, &provider, identity.subject.clone());
            self.db.insert_user_identity(&link).await?;
            self.db.mark_email_verified(user.user_id).await?;
            return Ok(user);
        }

        // First login: create the user. The random placeholder password
        // can never verify; provider login is the only path in until a
        // reset.
        let placeholder = {
            let mut bytes = [0u8; 32];
            use rand::RngCore;
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            URL_SAFE_NO_PAD.encode(bytes)
        };
        let password_hash = hash_password(&Password::new(placeholder))
            .map_err(AppError::InternalError)?;

        let mut user = User::new(
            tenant_id,
            identity.email.clone(),
            password_hash.into_string(),
            identity.display_name.clone(),
        );
        user.email_verified = true;

        self.db.insert_user(&user).await?;
        let link = UserIdentity::new(user.user_id, &provider, identity.subject.clone());
        self.db.insert_user_identity(&link).await?;

        tracing::info!(user_id = %user.user_id, provider = provider_code, "User created from delegated login");
        Ok(user)
    }
}

/// Test double standing in for the external provider.
pub struct MockProvider {
    pub identity: ProviderIdentity,
    pub expected_code: String,
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn provider_code(&self) -> &'static str {
        IdentProvider::Google.as_str()
    }

    fn authorization_url(&self, state: &str) -> String {
        format!("https://provider.invalid/authorize?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderIdentity, AppError> {
        if code != self.expected_code {
            return Err(AppError::invalid_credentials());
        }
        Ok(self.identity.clone())
    }
}
