use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::identity::TokenResponse;

/// An in-progress device-code sign-in.
///
/// Produced by [`crate::auth::AccountManager::begin_device_flow`] and handed
/// back to [`crate::auth::AccountManager::complete_device_flow`]. The
/// verification URL and user code are shown to the user verbatim.
///
/// # Example
/// ```no_run
/// use graphkit::auth::AuthFlow;
/// use chrono::{Duration, Utc};
///
/// let flow = AuthFlow {
///     device_code: "device-code".to_string(),
///     user_code: "ABCD-EFGH".to_string(),
///     verification_uri: "https://microsoft.com/devicelogin".to_string(),
///     verification_uri_complete: None,
///     message: None,
///     interval_secs: 5,
///     expires_at: Utc::now() + Duration::minutes(15),
/// };
/// let opaque = flow.to_opaque()?;
/// assert_eq!(AuthFlow::from_opaque(&opaque)?.user_code, "ABCD-EFGH");
/// # Ok::<(), graphkit::auth::AuthError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthFlow {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub message: Option<String>,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
}

impl AuthFlow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Encode the flow as a URL-safe string a harness can hold between calls.
    pub fn to_opaque(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn from_opaque(value: &str) -> Result<Self, AuthError> {
        let raw = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|e| AuthError::Serialization(format!("invalid flow handle: {e}")))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Outcome of a single poll of the token endpoint.
#[derive(Debug, Clone)]
pub enum DeviceCodePoll {
    Pending { interval_secs: u64 },
    SlowDown { interval_secs: u64 },
    Authorized { tokens: TokenResponse },
    AccessDenied,
    Expired,
}
