use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::account::{Account, IdTokenClaims};
use super::device_code::{AuthFlow, DeviceCodePoll};
use super::error::AuthError;
use super::identity::IdentityClient;
use super::store::{CredentialStore, FileTokenStore};
use super::token::{AccessToken, Token};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::util::{CallContext, RetryPolicy};

const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

/// Result of one device-flow completion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFlowOutcome {
    Authenticated(Account),
    /// The user has not finished verification yet. Call again with the same
    /// flow after `retry_after`, which grows when the service asks the
    /// client to slow down.
    Pending { retry_after: std::time::Duration },
}

/// Owns the signed-in accounts and hands out valid access tokens for them.
///
/// Tokens are refreshed silently shortly before expiry. Concurrent refreshes
/// for one account collapse into a single call to the identity service.
///
/// # Example
/// ```no_run
/// use graphkit::auth::AccountManager;
/// use graphkit::config::GraphConfig;
///
/// # async fn run() -> Result<(), graphkit::error::GraphError> {
/// let manager = AccountManager::from_config(&GraphConfig::from_env())?;
/// for account in manager.list_accounts() {
///     let token = manager.resolve_token(&account.account_id).await?;
///     println!("{} -> {:?}", account.username, token);
/// }
/// # Ok(())
/// # }
/// ```
pub struct AccountManager {
    identity: IdentityClient,
    store: CredentialStore,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    refresh_skew: Duration,
    retry: RetryPolicy,
}

impl AccountManager {
    pub fn new(identity: IdentityClient, store: CredentialStore) -> Self {
        Self {
            identity,
            store,
            refresh_locks: Mutex::new(HashMap::new()),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// Build from configuration, loading the token cache file once.
    pub fn from_config(config: &GraphConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let identity = IdentityClient::from_config(config)?;
        let backend = Arc::new(FileTokenStore::new(config.token_cache_path.clone()));
        let store = CredentialStore::open(backend)?;
        Ok(Self::new(identity, store))
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Policy for transient identity-service failures during silent refresh.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    /// Accounts currently held in the token cache, in sign-in order.
    pub fn list_accounts(&self) -> Vec<Account> {
        self.store.accounts()
    }

    /// Start an interactive device-code sign-in. Nothing is persisted.
    pub async fn begin_device_flow(&self) -> Result<AuthFlow, GraphError> {
        let flow = self.identity.start_device_code().await?;
        debug!(verification_uri = %flow.verification_uri, "device flow started");
        Ok(flow)
    }

    /// Poll the identity service once for `flow`.
    ///
    /// On success the new token set is cached and persisted before the
    /// account is returned.
    pub async fn complete_device_flow(
        &self,
        flow: &AuthFlow,
    ) -> Result<DeviceFlowOutcome, GraphError> {
        if flow.is_expired(Utc::now()) {
            return Err(GraphError::AuthService(AuthError::Expired.to_string()));
        }
        let tokens = match self.identity.poll_device_code(flow).await? {
            DeviceCodePoll::Pending { interval_secs }
            | DeviceCodePoll::SlowDown { interval_secs } => {
                return Ok(DeviceFlowOutcome::Pending {
                    retry_after: std::time::Duration::from_secs(interval_secs),
                })
            }
            DeviceCodePoll::AccessDenied => {
                return Err(GraphError::AuthService(AuthError::AccessDenied.to_string()))
            }
            DeviceCodePoll::Expired => {
                return Err(GraphError::AuthService(AuthError::Expired.to_string()))
            }
            DeviceCodePoll::Authorized { tokens } => tokens,
        };

        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            GraphError::AuthService("token response carries no ID token".to_string())
        })?;
        let signed_in = IdTokenClaims::decode(id_token)
            .and_then(|claims| claims.to_account())
            .map_err(|e| GraphError::AuthService(e.to_string()))?;

        let token = tokens.into_token(Utc::now(), None);
        self.store
            .mutate(|cache| cache.upsert(signed_in.clone(), token))?;

        let account = self
            .list_accounts()
            .into_iter()
            .find(|a| {
                a.account_id == signed_in.account_id
                    && a.username.eq_ignore_ascii_case(&signed_in.username)
            })
            .ok_or_else(|| {
                GraphError::AuthService(format!(
                    "signed-in account {} not found in token cache",
                    signed_in.username
                ))
            })?;
        info!(account_id = %account.account_id, username = %account.username, "signed in");
        Ok(DeviceFlowOutcome::Authenticated(account))
    }

    /// A valid access token for `account_id`, refreshing silently if the
    /// cached one is about to expire. Never starts an interactive flow.
    pub async fn resolve_token(&self, account_id: &str) -> Result<AccessToken, GraphError> {
        self.resolve_token_with(account_id, &CallContext::default())
            .await
    }

    /// [`AccountManager::resolve_token`] bounded by `ctx`.
    pub async fn resolve_token_with(
        &self,
        account_id: &str,
        ctx: &CallContext,
    ) -> Result<AccessToken, GraphError> {
        let cached = self.cached_token(account_id)?;
        if cached.is_fresh(Utc::now(), self.refresh_skew) {
            return Ok(AccessToken::new(cached.access_token));
        }

        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;
        // Another task may have refreshed while we waited.
        let cached = self.cached_token(account_id)?;
        if cached.is_fresh(Utc::now(), self.refresh_skew) {
            return Ok(AccessToken::new(cached.access_token));
        }
        self.refresh_locked(account_id, &cached, ctx).await
    }

    /// Force a refresh after Graph rejected `rejected`, unless the cache
    /// already holds a different, still valid token.
    pub async fn refresh_rejected(
        &self,
        account_id: &str,
        rejected: &AccessToken,
    ) -> Result<AccessToken, GraphError> {
        self.refresh_rejected_with(account_id, rejected, &CallContext::default())
            .await
    }

    pub async fn refresh_rejected_with(
        &self,
        account_id: &str,
        rejected: &AccessToken,
        ctx: &CallContext,
    ) -> Result<AccessToken, GraphError> {
        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;
        let cached = self.cached_token(account_id)?;
        if cached.access_token != rejected.as_str()
            && cached.is_fresh(Utc::now(), self.refresh_skew)
        {
            return Ok(AccessToken::new(cached.access_token));
        }
        self.refresh_locked(account_id, &cached, ctx).await
    }

    fn cached_token(&self, account_id: &str) -> Result<Token, GraphError> {
        self.store
            .token(account_id)
            .ok_or_else(|| GraphError::reauth(account_id, "no cached credentials"))
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Caller must hold the account's refresh lock. Transient identity
    /// failures are retried; a rejected refresh token is final.
    async fn refresh_locked(
        &self,
        account_id: &str,
        current: &Token,
        ctx: &CallContext,
    ) -> Result<AccessToken, GraphError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| GraphError::reauth(account_id, "no refresh token cached"))?;

        let response = self
            .retry
            .execute(ctx, || async move {
                self.identity
                    .refresh(refresh_token)
                    .await
                    .map_err(|err| match err {
                        AuthError::Rejected { error, description } => {
                            let reason = match description {
                                Some(d) => format!("{error}: {d}"),
                                None => error,
                            };
                            GraphError::reauth(account_id, reason)
                        }
                        other => other.into(),
                    })
            })
            .await?;

        let token = response.into_token(Utc::now(), Some(current));
        let access = AccessToken::new(token.access_token.clone());
        let updated = self
            .store
            .mutate(|cache| cache.update_token(account_id, token))?;
        if !updated {
            return Err(GraphError::reauth(account_id, "account removed during refresh"));
        }
        info!(account_id, "refreshed access token");
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;

    #[derive(Default)]
    struct MemoryStore {
        blob: Mutex<Option<String>>,
    }

    impl TokenStore for MemoryStore {
        fn load(&self) -> Result<Option<String>, AuthError> {
            Ok(self.blob.lock().unwrap().clone())
        }

        fn save(&self, blob: &str) -> Result<(), AuthError> {
            *self.blob.lock().unwrap() = Some(blob.to_string());
            Ok(())
        }

        fn clear(&self) -> Result<(), AuthError> {
            *self.blob.lock().unwrap() = None;
            Ok(())
        }
    }

    fn manager() -> AccountManager {
        // Port 9 (discard) is never contacted by these tests.
        let identity = IdentityClient::new("app").with_authority_url("http://127.0.0.1:9");
        let store = CredentialStore::open(Arc::new(MemoryStore::default())).unwrap();
        AccountManager::new(identity, store)
    }

    fn account(id: &str) -> Account {
        Account {
            account_id: id.to_string(),
            username: format!("{id}@example.com"),
        }
    }

    #[tokio::test]
    async fn unknown_account_requires_reauth() {
        let err = manager().resolve_token("nobody").await.unwrap_err();
        assert!(matches!(err, GraphError::ReauthRequired { account_id, .. } if account_id == "nobody"));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_from_cache() {
        let manager = manager();
        let token = Token {
            access_token: "cached".into(),
            refresh_token: Some("r".into()),
            id_token: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            last_refresh: None,
            scopes: None,
        };
        manager
            .credential_store()
            .mutate(|cache| cache.upsert(account("a"), token))
            .unwrap();

        let access = manager.resolve_token("a").await.unwrap();
        assert_eq!(access.as_str(), "cached");
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_reauth() {
        let manager = manager();
        let token = Token {
            access_token: "stale".into(),
            refresh_token: None,
            id_token: None,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            last_refresh: None,
            scopes: None,
        };
        manager
            .credential_store()
            .mutate(|cache| cache.upsert(account("a"), token))
            .unwrap();

        let err = manager.resolve_token("a").await.unwrap_err();
        assert!(matches!(err, GraphError::ReauthRequired { .. }));
    }

    #[test]
    fn refresh_locks_are_per_account() {
        let manager = manager();
        let a1 = manager.refresh_lock("a");
        let a2 = manager.refresh_lock("a");
        let b = manager.refresh_lock("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
