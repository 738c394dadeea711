use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// OAuth token set cached for one account.
///
/// # Example
/// ```no_run
/// use graphkit::auth::Token;
/// use chrono::{Duration, Utc};
///
/// let token = Token {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     id_token: None,
///     expires_at: Some(Utc::now() + Duration::hours(1)),
///     last_refresh: Some(Utc::now()),
///     scopes: Some(vec!["Mail.Read".to_string()]),
/// };
/// assert!(token.is_fresh(Utc::now(), Duration::seconds(60)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

impl Token {
    /// Whether the access token is still usable `skew` before its expiry.
    /// A token without a recorded expiry is treated as usable.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at.map(|exp| exp - skew > now).unwrap_or(true)
    }
}

/// Bearer credential handed to the request engine.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}
