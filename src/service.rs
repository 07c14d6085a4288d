//! Client for the remote object-graph REST service.
//!
//! Relationship accessors are plain [`RelationshipDescriptor`] values built
//! from an object's `relationshipMetadata`; pages are pulled with [`fetch`],
//! [`fetch_all`] or the concurrent [`scrape`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::GraphError;
use crate::record::{GraphEdge, GraphNode, NodeRef};

pub const ENV_API_URL: &str = "BIOBOX_API_URL";
pub const ENV_ORG_ID: &str = "BIOBOX_ORGID";
pub const ENV_TOKEN: &str = "BIOBOX_TOKEN";

/// Base URL and credentials, resolved once and handed to the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub org_id: String,
    pub token: String,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("org_id", &self.org_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Some(Self {
            base_url: value(ENV_API_URL)?,
            org_id: value(ENV_ORG_ID)?,
            token: value(ENV_TOKEN)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Body of one relationship page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipQuery {
    pub db_label: String,
    pub directionality: Direction,
    pub limit: usize,
    pub offset: usize,
    pub relationship_label: String,
}

/// One relationship group of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipDescriptor {
    pub object_uuid: String,
    pub label: String,
    pub direction: Direction,
    /// Total connections reported by the service, when known.
    pub count_hint: Option<u64>,
    /// Concept label of the objects on the other end.
    pub match_label: String,
}

impl RelationshipDescriptor {
    pub fn from_metadata(object_uuid: &str, group: &Value) -> Result<Self, GraphError> {
        let invalid = |reason: &str| GraphError::Serialization(format!("relationship metadata: {reason}"));
        let relationship = group
            .get("relationship")
            .ok_or_else(|| invalid("missing `relationship`"))?;
        let label = relationship
            .get("label")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing `relationship.label`"))?;
        let direction = match group.get("outbound").and_then(Value::as_bool) {
            Some(false) => Direction::Inbound,
            _ => Direction::Outbound,
        };
        let side = match direction {
            Direction::Outbound => "range",
            Direction::Inbound => "domain",
        };
        let match_label = relationship
            .get(side)
            .and_then(|entries| entries.get(0))
            .and_then(|entry| entry.get("dbLabel"))
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(&format!("missing `relationship.{side}[0].dbLabel`")))?;
        Ok(Self {
            object_uuid: object_uuid.to_string(),
            label: label.to_string(),
            direction,
            count_hint: group.get("total").and_then(Value::as_u64),
            match_label: match_label.to_string(),
        })
    }

    pub fn query(&self, limit: usize, offset: usize) -> RelationshipQuery {
        RelationshipQuery {
            db_label: self.match_label.clone(),
            directionality: self.direction,
            limit,
            offset,
            relationship_label: self.label.clone(),
        }
    }
}

/// Descriptors for every relationship group of a fetched object.
pub fn descriptors(object: &Value) -> Result<Vec<RelationshipDescriptor>, GraphError> {
    let uuid = object
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::Serialization("object has no uuid".to_string()))?;
    object
        .get("relationshipMetadata")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|group| RelationshipDescriptor::from_metadata(uuid, group))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSummary {
    pub element_id: String,
    pub label: String,
    pub properties: Value,
}

/// An edge of a relationship page together with the node on its far end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedObject {
    pub edge: EdgeSummary,
    pub node: Value,
}

impl RelatedObject {
    pub fn from_page_entry(entry: &Value, direction: Direction) -> Result<Self, GraphError> {
        let missing = |field: &str| GraphError::Serialization(format!("relationship entry has no `{field}`"));
        let element_id = entry
            .get("elementId")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("elementId"))?;
        let label = entry
            .pointer("/relationship/label")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("relationship.label"))?;
        let node_key = match direction {
            Direction::Outbound => "endNode",
            Direction::Inbound => "startNode",
        };
        let node = entry.get(node_key).cloned().ok_or_else(|| missing(node_key))?;
        Ok(Self {
            edge: EdgeSummary {
                element_id: element_id.to_string(),
                label: label.to_string(),
                properties: entry.get("properties").cloned().unwrap_or(Value::Null),
            },
            node,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProperty {
    pub data_property_uri: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPayload {
    pub uuid: String,
    pub display_name: String,
    pub properties: Vec<DataProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObjectRequest {
    pub concept_uri: String,
    pub payload: Vec<ObjectPayload>,
}

impl CreateObjectRequest {
    pub fn new(concept_uri: impl Into<String>, nodes: &[GraphNode]) -> Self {
        Self {
            concept_uri: concept_uri.into(),
            payload: nodes.iter().map(ObjectPayload::from).collect(),
        }
    }
}

impl From<&GraphNode> for ObjectPayload {
    fn from(node: &GraphNode) -> Self {
        let display_name = node
            .properties
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or(node.id.as_str())
            .to_string();
        let mut properties = vec![
            DataProperty {
                data_property_uri: "uuid".to_string(),
                value: Value::String(node.id.clone()),
            },
            DataProperty {
                data_property_uri: "displayName".to_string(),
                value: Value::String(display_name.clone()),
            },
        ];
        properties.extend(
            node.properties
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "uuid" | "displayName"))
                .map(|(key, value)| DataProperty {
                    data_property_uri: key.clone(),
                    value: value.clone(),
                }),
        );
        Self {
            uuid: node.id.clone(),
            display_name,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachRequest {
    pub from: NodeRef,
    pub to: NodeRef,
    pub label: String,
    pub properties: Vec<DataProperty>,
}

impl From<&GraphEdge> for AttachRequest {
    fn from(edge: &GraphEdge) -> Self {
        Self {
            from: edge.from.clone(),
            to: edge.to.clone(),
            label: edge.label.clone(),
            properties: edge
                .properties
                .iter()
                .flatten()
                .map(|(key, value)| DataProperty {
                    data_property_uri: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

pub trait GraphService: Send + Sync {
    /// URI of the concept with this label, `None` when it is not registered.
    fn concept_uri(&self, db_label: &str) -> Result<Option<String>, GraphError>;
    fn get_object(&self, id: &str) -> Result<Option<Value>, GraphError>;
    fn create_objects(&self, request: &CreateObjectRequest) -> Result<Value, GraphError>;
    fn attach(&self, request: &AttachRequest) -> Result<Value, GraphError>;
    /// Raw page body; entries are under `data`.
    fn relationship_page(&self, object_uuid: &str, query: &RelationshipQuery) -> Result<Value, GraphError>;
}

#[derive(Clone)]
pub struct GraphServiceHttpClient {
    client: Client,
    base_url: Url,
}

impl GraphServiceHttpClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, GraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biograph/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GraphError::UpstreamHttp(err.to_string()))?,
        );
        headers.insert(
            "x-biobox-orgid",
            HeaderValue::from_str(&config.org_id).map_err(|err| GraphError::UpstreamHttp(err.to_string()))?,
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|err| GraphError::UpstreamHttp(err.to_string()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| GraphError::UpstreamHttp(err.to_string()))?;
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|err| GraphError::UpstreamHttp(format!("invalid base url: {err}")))?;
        Ok(Self { client, base_url })
    }

    /// `{base}/{segments...}` with every segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, GraphError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GraphError::UpstreamHttp("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send(request: RequestBuilder) -> Result<Response, GraphError> {
        request
            .send()
            .map_err(|err| GraphError::UpstreamHttp(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, GraphError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "graph service request failed".to_string());
        Err(GraphError::UpstreamStatus { status, message })
    }

    fn json(response: Response) -> Result<Value, GraphError> {
        Self::handle_status(response)?
            .json()
            .map_err(|err| GraphError::UpstreamHttp(err.to_string()))
    }
}

impl GraphService for GraphServiceHttpClient {
    fn concept_uri(&self, db_label: &str) -> Result<Option<String>, GraphError> {
        let url = self.endpoint(&["concept", db_label])?;
        let response = Self::send(self.client.get(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let concept = Self::json(response)?;
        Ok(concept.get("uri").and_then(Value::as_str).map(str::to_string))
    }

    fn get_object(&self, id: &str) -> Result<Option<Value>, GraphError> {
        let url = self.endpoint(&["object", id])?;
        let response = Self::send(self.client.get(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json(response).map(Some)
    }

    fn create_objects(&self, request: &CreateObjectRequest) -> Result<Value, GraphError> {
        let url = self.endpoint(&["object"])?;
        Self::json(Self::send(self.client.post(url).json(request))?)
    }

    fn attach(&self, request: &AttachRequest) -> Result<Value, GraphError> {
        let url = self.endpoint(&["attach", "object"])?;
        Self::json(Self::send(self.client.post(url).json(request))?)
    }

    fn relationship_page(&self, object_uuid: &str, query: &RelationshipQuery) -> Result<Value, GraphError> {
        let url = self.endpoint(&["object", object_uuid, "relationship"])?;
        Self::json(Self::send(self.client.post(url).json(query))?)
    }
}

/// One page of related objects.
pub fn fetch<S: GraphService + ?Sized>(
    service: &S,
    descriptor: &RelationshipDescriptor,
    limit: usize,
    offset: usize,
) -> Result<Vec<RelatedObject>, GraphError> {
    if limit < 1 {
        return Err(GraphError::InvalidLimit(limit));
    }
    let page = service.relationship_page(&descriptor.object_uuid, &descriptor.query(limit, offset))?;
    page.get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|entry| RelatedObject::from_page_entry(entry, descriptor.direction))
        .collect()
}

/// Every related object, page by page. Without a count hint paging stops at
/// the first short page.
pub fn fetch_all<S: GraphService + ?Sized>(
    service: &S,
    descriptor: &RelationshipDescriptor,
    limit: usize,
) -> Result<Vec<RelatedObject>, GraphError> {
    if limit < 1 {
        return Err(GraphError::InvalidLimit(limit));
    }
    let mut result = Vec::new();
    let mut offset = 0usize;
    loop {
        if let Some(total) = descriptor.count_hint {
            if offset as u64 >= total {
                break;
            }
        }
        let page = fetch(service, descriptor, limit, offset)?;
        let short = page.len() < limit;
        result.extend(page);
        if descriptor.count_hint.is_none() && short {
            break;
        }
        offset += limit;
    }
    Ok(result)
}

/// Fetches all pages with up to `max_workers` threads. Pages complete in any
/// order; the result is reassembled in offset order. The first failing page
/// stops the remaining workers and fails the whole scrape.
pub fn scrape<S: GraphService + ?Sized>(
    service: &S,
    descriptor: &RelationshipDescriptor,
    limit: usize,
    max_workers: usize,
) -> Result<Vec<RelatedObject>, GraphError> {
    if limit < 1 {
        return Err(GraphError::InvalidLimit(limit));
    }
    let Some(total) = descriptor.count_hint else {
        return fetch_all(service, descriptor, limit);
    };
    let offsets = (0..total as usize).step_by(limit).collect::<Vec<_>>();
    if offsets.is_empty() {
        return Ok(Vec::new());
    }
    let workers = max_workers.clamp(1, offsets.len());
    info!(
        relationship = %descriptor.label,
        pages = offsets.len(),
        workers,
        "scraping relationship pages"
    );

    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let (sender, receiver) = mpsc::channel();
    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let (next, failed, offsets) = (&next, &failed, &offsets);
            scope.spawn(move || {
                while !failed.load(Ordering::Relaxed) {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&offset) = offsets.get(index) else {
                        break;
                    };
                    debug!(offset, "fetching page");
                    let page = fetch(service, descriptor, limit, offset);
                    if page.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    if sender.send((offset, page)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(sender);

    let mut pages = BTreeMap::new();
    for (offset, page) in receiver {
        pages.insert(offset, page?);
    }
    Ok(pages.into_values().flatten().collect())
}
