//! The serialized token cache shared by every signed-in account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::Account;
use super::error::AuthError;
use super::token::Token;

const CACHE_VERSION: u32 = 1;

/// One cached account with its token set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub added_at: DateTime<Utc>,
    pub account: Account,
    pub token: Token,
}

/// Process-wide token cache, persisted as a single blob.
///
/// Entries keep insertion order. Every mutation sets the state-changed flag;
/// reads never do. The owner persists the cache when the flag is set and then
/// calls [`TokenCache::mark_persisted`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    version: u32,
    #[serde(default)]
    entries: Vec<CacheEntry>,
    #[serde(skip)]
    state_changed: bool,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: Vec::new(),
            state_changed: false,
        }
    }
}

impl TokenCache {
    pub fn deserialize(blob: &str) -> Result<Self, AuthError> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        let cache: TokenCache = toml::from_str(blob)?;
        if cache.version != CACHE_VERSION {
            return Err(AuthError::Serialization(format!(
                "unsupported token cache version {}",
                cache.version
            )));
        }
        Ok(cache)
    }

    pub fn serialize(&self) -> Result<String, AuthError> {
        Ok(toml::to_string(self)?)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.entries.iter().map(|e| e.account.clone()).collect()
    }

    pub fn entry(&self, account_id: &str) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|e| e.account.account_id == account_id)
    }

    pub fn token(&self, account_id: &str) -> Option<&Token> {
        self.entry(account_id).map(|e| &e.token)
    }

    /// Insert a freshly signed-in account, or replace the token of an account
    /// that signed in again. A repeated sign-in keeps its original position.
    pub fn upsert(&mut self, account: Account, token: Token) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.account.account_id == account.account_id)
        {
            Some(entry) => {
                entry.account = account;
                entry.token = token;
            }
            None => self.entries.push(CacheEntry {
                added_at: Utc::now(),
                account,
                token,
            }),
        }
        self.state_changed = true;
    }

    /// Replace the token of an existing account. Returns `false` when the
    /// account is unknown.
    pub fn update_token(&mut self, account_id: &str, token: Token) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.account.account_id == account_id)
        else {
            return false;
        };
        entry.token = token;
        self.state_changed = true;
        true
    }

    pub fn remove(&mut self, account_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.account.account_id != account_id);
        let removed = self.entries.len() != before;
        if removed {
            self.state_changed = true;
        }
        removed
    }

    pub fn has_state_changed(&self) -> bool {
        self.state_changed
    }

    pub fn mark_persisted(&mut self) {
        self.state_changed = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
