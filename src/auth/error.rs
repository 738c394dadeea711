use thiserror::Error;

use crate::error::GraphError;

/// Errors raised while talking to the identity platform or the token cache.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Access denied by user")]
    AccessDenied,
    #[error("Device code expired")]
    Expired,
    #[error("Identity service rejected the request: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Rejected {
        error: String,
        description: Option<String>,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Identity service unavailable (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<AuthError> for GraphError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Network(message) => GraphError::TransientService {
                status: None,
                message,
                retry_after_ms: None,
            },
            AuthError::Server { status, message } => GraphError::TransientService {
                status: Some(status),
                message,
                retry_after_ms: None,
            },
            AuthError::Io(message) | AuthError::Serialization(message) => {
                GraphError::Storage(message)
            }
            other => GraphError::AuthService(other.to_string()),
        }
    }
}
