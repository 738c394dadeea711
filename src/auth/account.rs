use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// One signed-in identity usable for Graph calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque identifier, `<object id>.<tenant id>`.
    pub account_id: String,
    pub username: String,
}

/// The subset of ID token claims used to identify an account.
///
/// The token's signature is not verified: it was received directly from the
/// token endpoint over TLS and is only read for its identity claims.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub tid: Option<String>,
    pub sub: Option<String>,
    pub preferred_username: Option<String>,
    pub upn: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl IdTokenClaims {
    pub fn decode(id_token: &str) -> Result<Self, AuthError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::InvalidResponse("ID token is not a JWT".to_string()))?;
        let raw = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidResponse(format!("ID token payload: {e}")))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// The sign-in name, preferring `preferred_username`.
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.upn.as_deref())
            .or(self.email.as_deref())
    }

    /// Home account identifier in the identity platform's `<oid>.<tid>` form.
    pub fn home_account_id(&self) -> Option<String> {
        let object_id = self.oid.as_deref().or(self.sub.as_deref())?;
        match self.tid.as_deref() {
            Some(tenant) => Some(format!("{object_id}.{tenant}")),
            None => Some(object_id.to_string()),
        }
    }

    /// Build the account these claims describe.
    pub fn to_account(&self) -> Result<Account, AuthError> {
        let account_id = self.home_account_id().ok_or_else(|| {
            AuthError::InvalidResponse("ID token has no subject claim".to_string())
        })?;
        let username = self.username().ok_or_else(|| {
            AuthError::InvalidResponse("ID token has no username claim".to_string())
        })?;
        Ok(Account {
            account_id,
            username: username.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_home_account_and_username() {
        let token = jwt(json!({
            "oid": "0000-1111",
            "tid": "tenant-9",
            "preferred_username": "Ada@Contoso.com",
            "name": "Ada"
        }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        let account = claims.to_account().unwrap();
        assert_eq!(account.account_id, "0000-1111.tenant-9");
        assert_eq!(account.username, "Ada@Contoso.com");
    }

    #[test]
    fn falls_back_to_upn_when_preferred_username_missing() {
        let token = jwt(json!({ "sub": "s1", "upn": "grace@example.org" }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        assert_eq!(claims.username(), Some("grace@example.org"));
        assert_eq!(claims.home_account_id().as_deref(), Some("s1"));
    }

    #[test]
    fn rejects_claims_without_identity() {
        let token = jwt(json!({ "name": "nobody" }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        assert!(claims.to_account().is_err());
    }

    #[test]
    fn rejects_non_jwt_input() {
        assert!(matches!(
            IdTokenClaims::decode("opaque"),
            Err(AuthError::InvalidResponse(_))
        ));
    }
}
