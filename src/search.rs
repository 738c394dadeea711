//! Unified search over `/search/query`.

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use reqwest::Method;
use serde_json::{json, Value};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::GraphError;
use crate::graph::{GraphClient, GraphRequest};
use crate::util::CallContext;

/// Largest page the search endpoint serves for most entity types.
pub const MAX_SEARCH_PAGE: usize = 25;
/// Entity types searched when the caller names none.
pub const DEFAULT_ENTITY_TYPES: &[&str] = &["message", "event", "driveItem"];

/// Coarse kind of a search hit, read from its `@odata.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum EntityKind {
    Message,
    Event,
    DriveItem,
    Other,
}

impl EntityKind {
    pub fn of(resource: &Value) -> Self {
        let odata_type = resource
            .get("@odata.type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let name = odata_type
            .trim_start_matches('#')
            .trim_start_matches("microsoft.graph.");
        match name {
            "message" => Self::Message,
            "event" => Self::Event,
            "driveItem" | "file" | "folder" => Self::DriveItem,
            _ => Self::Other,
        }
    }
}

/// Bucket search results by kind, keeping their order within each bucket.
pub fn group_by_kind(items: impl IntoIterator<Item = Value>) -> BTreeMap<EntityKind, Vec<Value>> {
    let mut groups: BTreeMap<EntityKind, Vec<Value>> = BTreeMap::new();
    for item in items {
        groups.entry(EntityKind::of(&item)).or_default().push(item);
    }
    groups
}

impl GraphClient {
    /// Stream the resources matching `query` across `entity_types`
    /// (e.g. `message`, `event`, `driveItem`). An empty list searches
    /// [`DEFAULT_ENTITY_TYPES`].
    ///
    /// Continues while the service reports more results, requesting at most
    /// [`MAX_SEARCH_PAGE`] hits per call. `limit` behaves as in
    /// [`GraphClient::paginate`].
    pub fn search(
        &self,
        query: &str,
        entity_types: &[&str],
        account_id: &str,
        limit: Option<usize>,
    ) -> BoxStream<'static, Result<Value, GraphError>> {
        self.search_with(
            query,
            entity_types,
            account_id,
            limit,
            CallContext::default(),
        )
    }

    pub fn search_with(
        &self,
        query: &str,
        entity_types: &[&str],
        account_id: &str,
        limit: Option<usize>,
        ctx: CallContext,
    ) -> BoxStream<'static, Result<Value, GraphError>> {
        let client = self.clone();
        let query = query.to_string();
        let entity_types: Vec<String> = if entity_types.is_empty() {
            DEFAULT_ENTITY_TYPES
        } else {
            entity_types
        }
        .iter()
        .map(|s| s.to_string())
        .collect();
        let account_id = account_id.to_string();

        let stream = async_stream::stream! {
            if limit != Some(0) {
                let mut from = 0usize;
                let mut yielded = 0usize;
                'pages: loop {
                    let size = match limit {
                        Some(max) => MAX_SEARCH_PAGE.min(max - yielded),
                        None => MAX_SEARCH_PAGE,
                    };
                    let request = search_request(&query, &entity_types, from, size);
                    let parsed = client
                        .execute_with(&account_id, &request, &ctx)
                        .await
                        .and_then(|response| response.require_json())
                        .and_then(parse_hits);
                    let (hits, more) = match parsed {
                        Ok(page) => page,
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    };
                    debug!(from, hits = hits.len(), more, "search page");
                    let received = hits.len();
                    for hit in hits {
                        yield Ok(hit);
                        yielded += 1;
                        if limit.is_some_and(|max| yielded >= max) {
                            break 'pages;
                        }
                    }
                    if !more || received == 0 {
                        break;
                    }
                    from += received;
                }
            }
        };

        Box::pin(stream)
    }
}

fn search_request(query: &str, entity_types: &[String], from: usize, size: usize) -> GraphRequest {
    GraphRequest::builder()
        .method(Method::POST)
        .path("/search/query")
        .json(json!({
            "requests": [{
                "entityTypes": entity_types,
                "query": { "queryString": query },
                "from": from,
                "size": size,
            }]
        }))
        .build()
}

/// Flatten `value[].hitsContainers[].hits[].resource` and report whether
/// any container has more results.
fn parse_hits(body: Value) -> Result<(Vec<Value>, bool), GraphError> {
    let mut resources = Vec::new();
    let mut more = false;
    let responses = match body {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(responses)) => responses,
            _ => {
                return Err(GraphError::ProtocolViolation(
                    "search response has no value array".to_string(),
                ))
            }
        },
        _ => {
            return Err(GraphError::ProtocolViolation(
                "search response is not an object".to_string(),
            ))
        }
    };
    for response in responses {
        let Some(containers) = response.get("hitsContainers").and_then(Value::as_array) else {
            continue;
        };
        for container in containers {
            more |= container
                .get("moreResultsAvailable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let hits = container.get("hits").and_then(Value::as_array);
            for hit in hits.into_iter().flatten() {
                if let Some(resource) = hit.get("resource") {
                    resources.push(resource.clone());
                }
            }
        }
    }
    Ok((resources, more))
}
