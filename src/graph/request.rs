//! The request engine: one authenticated Graph call with retry.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::http::{bearer_headers, is_absolute, join_url, status_to_error};
use super::{owned_query, GraphClient, GraphRequest, GraphResponse};
use crate::auth::AccessToken;
use crate::error::GraphError;
use crate::util::CallContext;

/// Result of a single attempt. A 401 is kept out of the retry loop so the
/// caller can refresh the token first.
enum Attempt {
    Response(GraphResponse),
    Unauthorized,
}

impl GraphClient {
    /// Issue one authenticated call and normalize the result.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        account_id: &str,
        query: &[(&str, &str)],
        json: Option<Value>,
    ) -> Result<GraphResponse, GraphError> {
        let request = GraphRequest::builder()
            .method(method)
            .path(path)
            .query(owned_query(query))
            .maybe_json(json)
            .build();
        self.execute_with(account_id, &request, &CallContext::default())
            .await
    }

    /// Full form of [`GraphClient::execute`].
    ///
    /// Throttling, 503 and network failures are retried under the client's
    /// [`crate::util::RetryPolicy`]. A 401 triggers exactly one token refresh
    /// and one more attempt; a second 401 means the account must sign in again.
    pub async fn execute_with(
        &self,
        account_id: &str,
        request: &GraphRequest,
        ctx: &CallContext,
    ) -> Result<GraphResponse, GraphError> {
        ctx.check()?;
        let mut token = self.accounts.resolve_token_with(account_id, ctx).await?;
        let mut refreshed = false;
        loop {
            let attempt = self
                .retry
                .execute(ctx, || self.send_once(&token, request))
                .await?;
            match attempt {
                Attempt::Response(response) => return Ok(response),
                Attempt::Unauthorized if !refreshed => {
                    warn!(account_id, path = %request.path, "token rejected, refreshing");
                    token = self
                        .accounts
                        .refresh_rejected_with(account_id, &token, ctx)
                        .await?;
                    refreshed = true;
                }
                Attempt::Unauthorized => {
                    return Err(GraphError::reauth(
                        account_id,
                        "Graph rejected a freshly refreshed token",
                    ))
                }
            }
        }
    }

    async fn send_once(
        &self,
        token: &AccessToken,
        request: &GraphRequest,
    ) -> Result<Attempt, GraphError> {
        let url = join_url(&self.base_url, &request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(bearer_headers(token));
        // Continuation links already carry their query.
        if !is_absolute(&request.path) && !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        } else if let Some(body) = &request.body {
            let content_type = request
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream");
            builder = builder.header(CONTENT_TYPE, content_type).body(body.clone());
        }

        debug!(method = %request.method, url = %url, "graph request");
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "graph response");
        if !status.is_success() {
            return Err(status_to_error(
                status.as_u16(),
                &headers,
                &String::from_utf8_lossy(&body),
            ));
        }
        parse_body(status, &body).map(Attempt::Response)
    }
}

pub(crate) fn parse_body(status: StatusCode, body: &[u8]) -> Result<GraphResponse, GraphError> {
    if status == StatusCode::NO_CONTENT || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(GraphResponse::Absent);
    }
    serde_json::from_slice(body)
        .map(GraphResponse::Json)
        .map_err(|e| GraphError::ProtocolViolation(format!("response body is not JSON: {e}")))
}
