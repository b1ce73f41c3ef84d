use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by every service in the workspace.
///
/// Security-sensitive failures (bad credentials, bad codes, unknown
/// identities) must all be raised as `Unauthenticated` with the same
/// generic message so callers cannot enumerate accounts.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid argument: {0}")]
    InvalidArgument(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(anyhow::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(anyhow::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(anyhow::Error),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Uniform credential failure. One message for unknown user, wrong
    /// password, wrong code, revoked token -- all of them.
    pub fn invalid_credentials() -> Self {
        AppError::Unauthenticated(anyhow::anyhow!("Invalid credentials"))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details, retry_after) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
                None,
            ),
            AppError::InvalidArgument(err) => {
                (StatusCode::BAD_REQUEST, err.to_string(), None, None)
            }
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None, None),
            AppError::Unauthenticated(err) => {
                (StatusCode::UNAUTHORIZED, err.to_string(), None, None)
            }
            AppError::PermissionDenied(err) => {
                (StatusCode::FORBIDDEN, err.to_string(), None, None)
            }
            AppError::AlreadyExists(err) => (StatusCode::CONFLICT, err.to_string(), None, None),
            AppError::ResourceExhausted(msg, retry) => {
                (StatusCode::TOO_MANY_REQUESTS, msg, None, retry)
            }
            // Dependency failures surface as a generic 500; the cause is
            // logged server-side and never returned to the caller.
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                    None,
                )
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                    None,
                )
            }
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
