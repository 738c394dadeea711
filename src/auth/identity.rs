//! Wire client for the Microsoft identity platform (v2.0 endpoints).

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::device_code::{AuthFlow, DeviceCodePoll};
use super::error::AuthError;
use super::token::Token;
use crate::config::GraphConfig;
use crate::error::GraphError;

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TENANT: &str = "common";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_DEVICE_CODE_TTL_SECS: u64 = 900;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const FALLBACK_VERIFICATION_URI: &str = "https://microsoft.com/devicelogin";

/// Device-code and refresh-token client for one app registration.
///
/// # Example
/// ```no_run
/// use graphkit::auth::IdentityClient;
///
/// let identity = IdentityClient::new("00000000-0000-0000-0000-000000000000")
///     .with_tenant("organizations")
///     .with_scopes(vec!["Mail.Read".to_string(), "offline_access".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    client_id: String,
    tenant: String,
    authority_url: String,
    scopes: Vec<String>,
}

impl IdentityClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: crate::graph::http::shared_client().clone(),
            client_id: client_id.into(),
            tenant: DEFAULT_TENANT.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            scopes: Vec::new(),
        }
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self, GraphError> {
        let client_id = config.require_client_id()?;
        Ok(Self::new(client_id)
            .with_tenant(config.tenant_id.clone())
            .with_authority_url(config.authority_url.clone())
            .with_scopes(config.scopes.clone()))
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        self.tenant = if tenant.trim().is_empty() {
            DEFAULT_TENANT.to_string()
        } else {
            tenant
        };
        self
    }

    pub fn with_authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{name}", self.authority_url, self.tenant)
    }

    fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Request a device code. Fails when no user code comes back.
    pub async fn start_device_code(&self) -> Result<AuthFlow, AuthError> {
        let scope = self.scope_param();
        let resp = self
            .client
            .post(self.endpoint("devicecode"))
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(AuthError::Server {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let payload: DeviceCodeResponse = resp.json().await?;
        let (Some(user_code), Some(device_code)) = (payload.user_code, payload.device_code) else {
            return Err(AuthError::Rejected {
                error: payload
                    .error
                    .unwrap_or_else(|| "missing_user_code".to_string()),
                description: payload.error_description,
            });
        };
        let verification_uri = match payload.verification_uri.or(payload.verification_url) {
            Some(uri) => uri,
            None => {
                warn!(
                    fallback = FALLBACK_VERIFICATION_URI,
                    "device code response has no verification URI"
                );
                FALLBACK_VERIFICATION_URI.to_string()
            }
        };
        let ttl = payload.expires_in.unwrap_or(DEFAULT_DEVICE_CODE_TTL_SECS);
        debug!(expires_in = ttl, "device code issued");
        Ok(AuthFlow {
            device_code,
            user_code,
            verification_uri,
            verification_uri_complete: payload.verification_uri_complete,
            message: payload.message,
            interval_secs: payload.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            expires_at: Utc::now() + Duration::seconds(ttl as i64),
        })
    }

    /// Poll the token endpoint once for a device-code flow.
    pub async fn poll_device_code(&self, flow: &AuthFlow) -> Result<DeviceCodePoll, AuthError> {
        if flow.is_expired(Utc::now()) {
            return Ok(DeviceCodePoll::Expired);
        }
        let resp = self
            .client
            .post(self.endpoint("token"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", flow.device_code.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            let tokens: TokenResponse = resp.json().await?;
            return Ok(DeviceCodePoll::Authorized { tokens });
        }
        if status.is_server_error() {
            return Err(AuthError::Server {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let payload: OAuthErrorResponse = resp.json().await?;
        match payload.error.as_str() {
            "authorization_pending" => Ok(DeviceCodePoll::Pending {
                interval_secs: flow.interval_secs,
            }),
            "slow_down" => Ok(DeviceCodePoll::SlowDown {
                interval_secs: flow.interval_secs + 5,
            }),
            "expired_token" | "code_expired" => Ok(DeviceCodePoll::Expired),
            "access_denied" | "authorization_declined" => Ok(DeviceCodePoll::AccessDenied),
            _ => Err(AuthError::Rejected {
                error: payload.error,
                description: payload.error_description,
            }),
        }
    }

    /// Redeem a refresh token for a new token set.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let scope = self.scope_param();
        let resp = self
            .client
            .post(self.endpoint("token"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(AuthError::Server {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(payload) => Err(AuthError::Rejected {
                error: payload.error,
                description: payload.error_description,
            }),
            Err(_) => Err(AuthError::Rejected {
                error: format!("http_{}", status.as_u16()),
                description: Some(body),
            }),
        }
    }
}

/// Token set returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Convert into a cacheable token. Fields the endpoint omitted on a
    /// refresh (refresh token, ID token) carry over from `previous`.
    pub fn into_token(self, now: DateTime<Utc>, previous: Option<&Token>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            id_token: self
                .id_token
                .or_else(|| previous.and_then(|p| p.id_token.clone())),
            expires_at: self.expires_in.map(|secs| now + Duration::seconds(secs)),
            last_refresh: Some(now),
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .or_else(|| previous.and_then(|p| p.scopes.clone())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    verification_uri: Option<String>,
    verification_url: Option<String>,
    verification_uri_complete: Option<String>,
    expires_in: Option<u64>,
    interval: Option<u64>,
    message: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_include_tenant() {
        let identity = IdentityClient::new("app")
            .with_authority_url("https://login.example/")
            .with_tenant("contoso");
        assert_eq!(
            identity.endpoint("token"),
            "https://login.example/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn blank_tenant_falls_back_to_common() {
        let identity = IdentityClient::new("app").with_tenant("  ");
        assert!(identity.endpoint("devicecode").contains("/common/"));
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token() {
        let now = Utc::now();
        let previous = Token {
            access_token: "old".into(),
            refresh_token: Some("rt-1".into()),
            id_token: Some("idt".into()),
            expires_at: None,
            last_refresh: None,
            scopes: Some(vec!["Mail.Read".into()]),
        };
        let response = TokenResponse {
            access_token: "new".into(),
            refresh_token: None,
            id_token: None,
            expires_in: Some(3600),
            scope: None,
            token_type: Some("Bearer".into()),
        };
        let token = response.into_token(now, Some(&previous));
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(token.id_token.as_deref(), Some("idt"));
        assert_eq!(token.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(token.scopes, Some(vec!["Mail.Read".to_string()]));
    }
}
