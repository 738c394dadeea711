use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::account::Account;
use super::cache::TokenCache;
use super::error::AuthError;
use super::token::Token;

/// Storage backend for the serialized token cache blob.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, AuthError>;
    fn save(&self, blob: &str) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// File-backed blob store.
///
/// # Example
/// ```no_run
/// use graphkit::auth::{FileTokenStore, TokenStore};
///
/// let store = FileTokenStore::new_default();
/// let blob = store.load()?;
/// # Ok::<(), graphkit::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn new_default() -> Self {
        Self::new(Self::default_path())
    }

    /// `~/.graphkit/token_cache.toml`.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".graphkit"))
            .unwrap_or_else(|| PathBuf::from(".graphkit"))
            .join("token_cache.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }

    /// Write through a sibling temp file (mode 0600 on Unix) renamed over the
    /// cache, so readers see either the old blob or the new one.
    fn save(&self, blob: &str) -> Result<(), AuthError> {
        Self::ensure_parent(&self.path)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(blob.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| AuthError::Io(e.error.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

/// The in-memory token cache plus the backend it is flushed to.
///
/// Loaded once at startup. Mutations go through [`CredentialStore::mutate`],
/// which serializes them and persists the blob only when the cache state
/// actually changed.
pub struct CredentialStore {
    backend: Arc<dyn TokenStore>,
    cache: Mutex<TokenCache>,
}

impl CredentialStore {
    pub fn open(backend: Arc<dyn TokenStore>) -> Result<Self, AuthError> {
        let cache = match backend.load()? {
            Some(blob) => TokenCache::deserialize(&blob)?,
            None => TokenCache::default(),
        };
        debug!(accounts = cache.len(), "loaded token cache");
        Ok(Self {
            backend,
            cache: Mutex::new(cache),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TokenCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.lock().accounts()
    }

    pub fn token(&self, account_id: &str) -> Option<Token> {
        self.lock().token(account_id).cloned()
    }

    /// Apply `f` to the cache and flush it if the cache reports a change.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut TokenCache) -> R) -> Result<R, AuthError> {
        let mut cache = self.lock();
        let result = f(&mut cache);
        if cache.has_state_changed() {
            let blob = cache.serialize()?;
            self.backend.save(&blob)?;
            cache.mark_persisted();
            debug!(accounts = cache.len(), "persisted token cache");
        }
        Ok(result)
    }
}
