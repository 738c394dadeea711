//! Authenticated access to the Microsoft Graph REST API.

pub mod http;
pub mod paginate;
pub mod request;
pub mod upload;

pub use paginate::{Page, PageCursor};
pub use upload::{
    ChunkOutcome, ConflictBehavior, DriveItemRef, SessionProgress, UploadEngine, UploadSession,
    UploadTarget, UploadedItem,
};

use std::sync::Arc;

use bon::Builder;
use reqwest::Method;
use serde_json::Value;

use crate::auth::AccountManager;
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::util::RetryPolicy;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Client for Graph calls made on behalf of signed-in accounts.
///
/// Cheap to clone; clones share the account manager and connection pool.
///
/// # Example
/// ```no_run
/// use graphkit::config::GraphConfig;
/// use graphkit::graph::GraphClient;
/// use reqwest::Method;
///
/// # async fn run() -> Result<(), graphkit::error::GraphError> {
/// let client = GraphClient::from_config(&GraphConfig::from_env())?;
/// let account = client.accounts().list_accounts().remove(0);
/// let me = client
///     .execute(Method::GET, "/me", &account.account_id, &[("$select", "displayName")], None)
///     .await?
///     .require_json()?;
/// println!("{}", me["displayName"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GraphClient {
    accounts: Arc<AccountManager>,
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(accounts: Arc<AccountManager>) -> Self {
        Self {
            accounts,
            http: http::shared_client().clone(),
            base_url: GRAPH_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self, GraphError> {
        let accounts = AccountManager::from_config(config)?;
        Ok(Self::new(Arc::new(accounts)).with_base_url(config.graph_base_url.clone()))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// One Graph call. `path` is relative to the base URL, or an absolute
/// continuation link used verbatim.
#[derive(Debug, Clone, Builder)]
pub struct GraphRequest {
    pub method: Method,
    #[builder(into)]
    pub path: String,
    #[builder(default)]
    pub query: Vec<(String, String)>,
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    pub body: Option<Vec<u8>>,
    #[builder(into)]
    pub content_type: Option<String>,
}

impl GraphRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::builder().method(Method::GET).path(path).build()
    }
}

/// Successful Graph response body.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphResponse {
    Json(Value),
    /// 204 or an empty body.
    Absent,
}

impl GraphResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// The JSON body, treating an absent body as a protocol error.
    pub fn require_json(self) -> Result<Value, GraphError> {
        self.into_json().ok_or_else(|| {
            GraphError::ProtocolViolation("expected a JSON body, got none".to_string())
        })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

pub(crate) fn owned_query(query: &[(&str, &str)]) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder_defaults() {
        let request = GraphRequest::builder()
            .method(Method::POST)
            .path("/me/sendMail")
            .json(json!({"message": {}}))
            .build();
        assert!(request.query.is_empty());
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
        assert_eq!(request.path, "/me/sendMail");
    }

    #[test]
    fn absent_response_is_not_json() {
        assert_eq!(GraphResponse::Absent.into_json(), None);
        assert!(matches!(
            GraphResponse::Absent.require_json(),
            Err(GraphError::ProtocolViolation(_))
        ));
        assert_eq!(
            GraphResponse::Json(json!({"id": 1})).require_json().unwrap(),
            json!({"id": 1})
        );
    }
}
