//! Configuration (layered: code > env > defaults).

use std::path::PathBuf;

use crate::auth::identity::{DEFAULT_AUTHORITY_URL, DEFAULT_TENANT};
use crate::auth::FileTokenStore;
use crate::error::GraphError;
use crate::graph::GRAPH_BASE_URL;

pub const CLIENT_ID_ENV: &str = "MICROSOFT_MCP_CLIENT_ID";
pub const TENANT_ID_ENV: &str = "MICROSOFT_MCP_TENANT_ID";
pub const SCOPES_ENV: &str = "GRAPHKIT_SCOPES";
pub const GRAPH_BASE_URL_ENV: &str = "GRAPHKIT_GRAPH_BASE_URL";
pub const AUTHORITY_URL_ENV: &str = "GRAPHKIT_AUTHORITY_URL";
pub const TOKEN_CACHE_ENV: &str = "GRAPHKIT_TOKEN_CACHE";

/// Delegated permissions requested at sign-in.
pub const DEFAULT_SCOPES: &[&str] = &[
    "User.Read",
    "Mail.ReadWrite",
    "Mail.Send",
    "Calendars.ReadWrite",
    "Contacts.ReadWrite",
    "Files.ReadWrite.All",
    "offline_access",
    "openid",
    "profile",
];

/// Settings shared by the account manager and the Graph client.
///
/// # Example
/// ```no_run
/// use graphkit::config::GraphConfig;
///
/// let config = GraphConfig::from_env().with_tenant_id("organizations");
/// config.validate()?;
/// # Ok::<(), graphkit::error::GraphError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    pub client_id: Option<String>,
    pub tenant_id: String,
    pub scopes: Vec<String>,
    pub graph_base_url: String,
    pub authority_url: String,
    pub token_cache_path: PathBuf,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            graph_base_url: GRAPH_BASE_URL.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            token_cache_path: FileTokenStore::default_path(),
        }
    }
}

impl GraphConfig {
    /// Load from environment variables, reading `.env` first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            client_id: get(CLIENT_ID_ENV),
            tenant_id: get(TENANT_ID_ENV).unwrap_or(defaults.tenant_id),
            scopes: get(SCOPES_ENV)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.scopes),
            graph_base_url: get(GRAPH_BASE_URL_ENV).unwrap_or(defaults.graph_base_url),
            authority_url: get(AUTHORITY_URL_ENV).unwrap_or(defaults.authority_url),
            token_cache_path: get(TOKEN_CACHE_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.token_cache_path),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }

    pub fn with_authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into();
        self
    }

    pub fn with_token_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_cache_path = path.into();
        self
    }

    pub fn require_client_id(&self) -> Result<String, GraphError> {
        self.client_id.clone().ok_or_else(|| {
            GraphError::Configuration(format!("{CLIENT_ID_ENV} environment variable is required"))
        })
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        self.require_client_id()?;
        if self.scopes.is_empty() {
            return Err(GraphError::Configuration("no scopes configured".to_string()));
        }
        for (name, url) in [
            ("Graph base URL", &self.graph_base_url),
            ("authority URL", &self.authority_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(GraphError::Configuration(format!(
                    "{name} must be an http(s) URL: {url}"
                )));
            }
        }
        Ok(())
    }
}
