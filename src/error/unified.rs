//! Error classification and the Graph error payload.

use serde::{Deserialize, Serialize};

/// Broad error category for routing retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Server,
    Api,
    Protocol,
    Interrupted,
    Configuration,
    Storage,
}

/// Structured details from a Graph error body:
/// `{"error": {"code", "message", "innerError": {"request-id", "date"}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub request_id: Option<String>,
    pub date: Option<String>,
}

impl GraphErrorDetails {
    /// Parse a Graph error body. Returns `None` when the body has no `error` object.
    pub fn parse(body: &str) -> Option<Self> {
        let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
        let inner = envelope.error.inner_error.unwrap_or_default();
        Some(Self {
            code: envelope.error.code,
            message: envelope.error.message,
            request_id: inner.request_id,
            date: inner.date,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "innerError", alias = "innererror")]
    inner_error: Option<InnerError>,
}

#[derive(Debug, Default, Deserialize)]
struct InnerError {
    #[serde(rename = "request-id")]
    request_id: Option<String>,
    date: Option<String>,
}
