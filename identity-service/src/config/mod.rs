use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub oauth: OAuthConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub mfa: MfaConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub oauth_state_expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Server-side pepper mixed into refresh-token and API-key hashes.
    /// Stored hashes are useless without it.
    pub token_hash_pepper: String,
    pub allowed_origins: Vec<String>,
    /// Revoke every session of a user when a rotated-out refresh token
    /// is presented again.
    pub revoke_on_reuse: bool,
}

/// Per-action abuse thresholds. Counters live in the shared cache so all
/// service instances observe the same windows.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: i64,
    pub otp_send_attempts: u32,
    pub otp_send_window_seconds: i64,
    pub refresh_attempts: u32,
    pub refresh_window_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    /// Issuer label embedded in TOTP provisioning URIs.
    pub totp_issuer: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
                oauth_state_expiry_minutes: parse_env(
                    "OAUTH_STATE_EXPIRY_MINUTES",
                    Some("10"),
                    is_prod,
                )?,
            },
            oauth: OAuthConfig {
                google_client_id: get_env("GOOGLE_CLIENT_ID", Some(""), is_prod)?,
                google_client_secret: get_env("GOOGLE_CLIENT_SECRET", Some(""), is_prod)?,
                google_redirect_uri: get_env("GOOGLE_REDIRECT_URI", Some(""), is_prod)?,
            },
            security: SecurityConfig {
                token_hash_pepper: get_env("TOKEN_HASH_PEPPER", None, is_prod)?,
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                revoke_on_reuse: parse_env("REVOKE_SESSIONS_ON_REUSE", Some("true"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("6"), is_prod)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
                otp_send_attempts: parse_env("RATE_LIMIT_OTP_SEND_ATTEMPTS", Some("3"), is_prod)?,
                otp_send_window_seconds: parse_env(
                    "RATE_LIMIT_OTP_SEND_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                refresh_attempts: parse_env("RATE_LIMIT_REFRESH_ATTEMPTS", Some("30"), is_prod)?,
                refresh_window_seconds: parse_env(
                    "RATE_LIMIT_REFRESH_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            mfa: MfaConfig {
                totp_issuer: get_env("TOTP_ISSUER", Some("identity-service"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 && self.environment == Environment::Prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.security.token_hash_pepper.len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_HASH_PEPPER must be at least 16 characters"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
