//! Error types for graphkit.

pub mod unified;

pub use unified::{ErrorCategory, GraphErrorDetails};

use thiserror::Error;

/// Primary error type for every operation that crosses the crate boundary.
///
/// Transport failures never escape raw: they are either retried to success or
/// folded into exactly one of these variants.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Identity service error: {0}")]
    AuthService(String),

    #[error("Re-authentication required for account {account_id}: {reason}")]
    ReauthRequired { account_id: String, reason: String },

    #[error("Transient service error (status {status:?}): {message}")]
    TransientService {
        status: Option<u16>,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Request failed (status {status}): {message}")]
    PermanentRequest {
        status: u16,
        message: String,
        details: Option<GraphErrorDetails>,
    },

    #[error("Upload session expired: {session_url}")]
    SessionExpired { session_url: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Caller deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Token cache storage error: {0}")]
    Storage(String),
}

impl GraphError {
    /// Create a terminal request error from a status and the raw response body.
    pub fn permanent(status: u16, body: &str) -> Self {
        let details = GraphErrorDetails::parse(body);
        let message = details
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| body.to_string());
        Self::PermanentRequest {
            status,
            message,
            details,
        }
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::TransientService {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Server-declared delay before the next attempt, if one was sent.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::TransientService {
                retry_after_ms: Some(ms),
                ..
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    pub fn reauth(account_id: &str, reason: impl Into<String>) -> Self {
        Self::ReauthRequired {
            account_id: account_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthService(_) => ErrorCategory::Authentication,
            Self::ReauthRequired { .. } => ErrorCategory::Authentication,
            Self::TransientService { status, .. } => match status {
                Some(429) => ErrorCategory::RateLimit,
                Some(500..=599) => ErrorCategory::Server,
                _ => ErrorCategory::Network,
            },
            Self::PermanentRequest { .. } => ErrorCategory::Api,
            Self::SessionExpired { .. } | Self::ProtocolViolation(_) => ErrorCategory::Protocol,
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Interrupted,
            Self::Configuration(_) | Self::InvalidArgument(_) => ErrorCategory::Configuration,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Whether a fresh attempt could succeed without any caller action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }

    /// Diagnostic payload returned by Graph, if any.
    pub fn details(&self) -> Option<&GraphErrorDetails> {
        match self {
            Self::PermanentRequest { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::ProtocolViolation(format!("undecodable response body: {error}"));
        }
        Self::TransientService {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
            retry_after_ms: None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_error_carries_graph_diagnostics() {
        let body = r#"{"error":{"code":"ErrorItemNotFound","message":"The specified object was not found in the store.","innerError":{"request-id":"abc-123","date":"2024-01-01T00:00:00"}}}"#;
        let err = GraphError::permanent(404, body);
        match &err {
            GraphError::PermanentRequest {
                status, message, ..
            } => {
                assert_eq!(*status, 404);
                assert_eq!(message, "The specified object was not found in the store.");
            }
            other => panic!("expected PermanentRequest, got {other:?}"),
        }
        let details = err.details().unwrap();
        assert_eq!(details.code.as_deref(), Some("ErrorItemNotFound"));
        assert_eq!(details.request_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn permanent_error_keeps_raw_body_when_unparseable() {
        let err = GraphError::permanent(400, "bad request");
        assert_eq!(err.to_string(), "Request failed (status 400): bad request");
        assert!(err.details().is_none());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(GraphError::transient(Some(429), "throttled").is_retryable());
        assert!(GraphError::transient(Some(503), "unavailable").is_retryable());
        assert!(GraphError::transient(None, "connection reset").is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!GraphError::permanent(400, "{}").is_retryable());
        assert!(!GraphError::reauth("acct", "no token").is_retryable());
        assert!(!GraphError::ProtocolViolation("offset".into()).is_retryable());
        assert!(!GraphError::SessionExpired {
            session_url: "https://up".into()
        }
        .is_retryable());
        assert!(!GraphError::Cancelled.is_retryable());
    }

    #[test]
    fn categories_follow_status() {
        assert_eq!(
            GraphError::transient(Some(429), "x").category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            GraphError::transient(Some(503), "x").category(),
            ErrorCategory::Server
        );
        assert_eq!(
            GraphError::DeadlineExceeded.category(),
            ErrorCategory::Interrupted
        );
    }
}
