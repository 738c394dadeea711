//! Lazy iteration over `@odata.nextLink` continuation pages.

use futures::stream::BoxStream;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::{owned_query, GraphClient, GraphRequest};
use crate::error::GraphError;
use crate::util::CallContext;

/// Opaque continuation token for the next page of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a collection.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    /// `None` when the server reports no further pages.
    pub next: Option<PageCursor>,
}

impl GraphClient {
    /// Fetch a single page. With a cursor, the cursor's link replaces
    /// `path` and `query` entirely.
    pub async fn fetch_page(
        &self,
        path: &str,
        account_id: &str,
        query: &[(&str, &str)],
        cursor: Option<&PageCursor>,
    ) -> Result<Page, GraphError> {
        self.fetch_page_with(
            path,
            account_id,
            &owned_query(query),
            cursor,
            &CallContext::default(),
        )
        .await
    }

    pub async fn fetch_page_with(
        &self,
        path: &str,
        account_id: &str,
        query: &[(String, String)],
        cursor: Option<&PageCursor>,
        ctx: &CallContext,
    ) -> Result<Page, GraphError> {
        let request = match cursor {
            Some(cursor) => GraphRequest::get(cursor.as_str()),
            None => GraphRequest::builder()
                .method(Method::GET)
                .path(path)
                .query(query.to_vec())
                .build(),
        };
        let body = self
            .execute_with(account_id, &request, ctx)
            .await?
            .require_json()?;
        let page = parse_page(body)?;
        if let (Some(next), Some(current)) = (&page.next, cursor) {
            if next == current {
                return Err(GraphError::ProtocolViolation(format!(
                    "continuation link repeats itself: {}",
                    next.as_str()
                )));
            }
        }
        debug!(
            path,
            items = page.items.len(),
            has_next = page.next.is_some(),
            "fetched page"
        );
        Ok(page)
    }

    /// Stream every item of a collection in server order, following
    /// continuation links until they run out or `limit` items were yielded.
    ///
    /// No request is made before the stream is polled, and `Some(0)` makes
    /// none at all. After an error the stream ends.
    ///
    /// # Example
    /// ```no_run
    /// use futures::StreamExt;
    /// # async fn run(client: graphkit::graph::GraphClient) -> Result<(), graphkit::error::GraphError> {
    /// let mut messages = client.paginate("/me/messages", "oid.tid", &[("$top", "50")], Some(120));
    /// while let Some(message) = messages.next().await {
    ///     println!("{}", message?["subject"]);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn paginate(
        &self,
        path: &str,
        account_id: &str,
        query: &[(&str, &str)],
        limit: Option<usize>,
    ) -> BoxStream<'static, Result<Value, GraphError>> {
        self.paginate_with(path, account_id, owned_query(query), limit, CallContext::default())
    }

    pub fn paginate_with(
        &self,
        path: &str,
        account_id: &str,
        query: Vec<(String, String)>,
        limit: Option<usize>,
        ctx: CallContext,
    ) -> BoxStream<'static, Result<Value, GraphError>> {
        let client = self.clone();
        let path = path.to_string();
        let account_id = account_id.to_string();

        let stream = async_stream::stream! {
            if limit != Some(0) {
                let mut cursor: Option<PageCursor> = None;
                let mut yielded = 0usize;
                'pages: loop {
                    let page = match client
                        .fetch_page_with(&path, &account_id, &query, cursor.as_ref(), &ctx)
                        .await
                    {
                        Ok(page) => page,
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    };
                    for item in page.items {
                        yield Ok(item);
                        yielded += 1;
                        if limit.is_some_and(|max| yielded >= max) {
                            break 'pages;
                        }
                    }
                    match page.next {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
            }
        };

        Box::pin(stream)
    }
}

fn parse_page(mut body: Value) -> Result<Page, GraphError> {
    let items = match body.get_mut("value").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(GraphError::ProtocolViolation(
                "page has no `value` array".to_string(),
            ))
        }
    };
    let next = body
        .get("@odata.nextLink")
        .and_then(Value::as_str)
        .filter(|link| !link.is_empty())
        .map(|link| PageCursor(link.to_string()));
    Ok(Page { items, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_with_next_link() {
        let page = parse_page(json!({
            "value": [{"id": 1}, {"id": 2}],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/messages?$skip=2"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.next.unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/me/messages?$skip=2"
        );
    }

    #[test]
    fn last_page_has_no_cursor() {
        let page = parse_page(json!({"value": []})).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn missing_value_is_a_protocol_violation() {
        assert!(matches!(
            parse_page(json!({"id": "single"})),
            Err(GraphError::ProtocolViolation(_))
        ));
        assert!(matches!(
            parse_page(json!({"value": "nope"})),
            Err(GraphError::ProtocolViolation(_))
        ));
    }
}
