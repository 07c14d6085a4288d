use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphError;

pub type Properties = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(rename = "_id")]
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: vec![label.into()],
            properties: Properties::new(),
        }
    }

    /// Labels form an ordered set: a repeated label keeps its first position.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), sanitize_value(value.into()));
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(sanitize_properties(properties));
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|value| value == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeRef,
    pub to: NodeRef,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            from: NodeRef { uuid: from.into() },
            to: NodeRef { uuid: to.into() },
            label: label.into(),
            properties: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), sanitize_value(value.into()));
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|props| props.get(key))
    }
}

/// A decoded wire line: nodes carry `_id`, edges carry `from`/`to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphRecord {
    Node(GraphNode),
    Edge(GraphEdge),
}

impl GraphRecord {
    pub fn from_wire(line: &str) -> Result<Self, GraphError> {
        serde_json::from_str(line).map_err(|err| GraphError::Serialization(err.to_string()))
    }
}

impl From<GraphNode> for GraphRecord {
    fn from(node: GraphNode) -> Self {
        GraphRecord::Node(node)
    }
}

impl From<GraphEdge> for GraphRecord {
    fn from(edge: GraphEdge) -> Self {
        GraphRecord::Edge(edge)
    }
}

/// One compact JSON value, no trailing newline.
pub fn to_wire<T: Serialize>(record: &T) -> Result<String, GraphError> {
    serde_json::to_string(record).map_err(|err| GraphError::Serialization(err.to_string()))
}

/// Keeps primitives and (nested) lists; objects collapse to their JSON text.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::String(Value::Object(map).to_string()),
        primitive => primitive,
    }
}

pub fn sanitize_properties(properties: Properties) -> Properties {
    properties
        .into_iter()
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

/// Converts any serializable value into a property value. Values that cannot
/// be represented as JSON degrade to their debug text.
pub fn property_value<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(value) => sanitize_value(value),
        Err(_) => Value::String(format!("{value:?}")),
    }
}
