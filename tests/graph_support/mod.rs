#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use graphkit::auth::{
    Account, AccountManager, AuthError, CredentialStore, IdentityClient, Token, TokenCache,
    TokenStore,
};
use graphkit::graph::GraphClient;
use graphkit::util::RetryPolicy;
use serde_json::json;
use wiremock::MockServer;

pub const OID: &str = "11111111-aaaa";
pub const TID: &str = "22222222-bbbb";
pub const USERNAME: &str = "ada@contoso.com";

pub fn account_id() -> String {
    format!("{OID}.{TID}")
}

pub fn account() -> Account {
    Account {
        account_id: account_id(),
        username: USERNAME.to_string(),
    }
}

/// Token cache backend that counts writes.
#[derive(Default)]
pub struct InMemoryTokenStore {
    blob: Mutex<Option<String>>,
    saves: AtomicUsize,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose blob already holds `entries`. The seeding write is not counted.
    pub fn seeded(entries: Vec<(Account, Token)>) -> Self {
        let mut cache = TokenCache::default();
        for (account, token) in entries {
            cache.upsert(account, token);
        }
        let store = Self::new();
        *store.blob.lock().expect("store lock poisoned") =
            Some(cache.serialize().expect("serialize cache"));
        store
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> TokenCache {
        let blob = self.blob.lock().expect("store lock poisoned").clone();
        TokenCache::deserialize(&blob.unwrap_or_default()).expect("deserialize cache")
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self) -> Result<Option<String>, AuthError> {
        Ok(self.blob.lock().expect("store lock poisoned").clone())
    }

    fn save(&self, blob: &str) -> Result<(), AuthError> {
        *self.blob.lock().expect("store lock poisoned") = Some(blob.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.blob.lock().expect("store lock poisoned") = None;
        Ok(())
    }
}

pub fn fake_id_token(oid: &str, tid: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({
        "oid": oid,
        "tid": tid,
        "preferred_username": username,
        "name": "Ada Lovelace"
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

pub fn fresh_token(access_token: &str) -> Token {
    Token {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        id_token: None,
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        last_refresh: Some(Utc::now()),
        scopes: None,
    }
}

pub fn expired_token(access_token: &str) -> Token {
    Token {
        expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
        ..fresh_token(access_token)
    }
}

pub fn token_path() -> &'static str {
    "/common/oauth2/v2.0/token"
}

pub fn device_code_path() -> &'static str {
    "/common/oauth2/v2.0/devicecode"
}

pub fn manager(server: &MockServer, store: Arc<InMemoryTokenStore>) -> AccountManager {
    let identity = IdentityClient::new("test-client")
        .with_authority_url(server.uri())
        .with_tenant("common")
        .with_scopes(vec!["Mail.Read".to_string(), "offline_access".to_string()]);
    let credentials = CredentialStore::open(store).expect("open credential store");
    AccountManager::new(identity, credentials).with_retry_policy(fast_retry())
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        ..RetryPolicy::default()
    }
}

/// Graph client against `server` for one account holding a fresh token.
pub fn graph_client(server: &MockServer, store: Arc<InMemoryTokenStore>) -> GraphClient {
    GraphClient::new(Arc::new(manager(server, store)))
        .with_base_url(server.uri())
        .with_retry_policy(fast_retry())
}

pub fn signed_in_client(server: &MockServer) -> GraphClient {
    let store = Arc::new(InMemoryTokenStore::seeded(vec![(
        account(),
        fresh_token("access-1"),
    )]));
    graph_client(server, store)
}
