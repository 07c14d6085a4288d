use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "0.0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMeta {
    pub version: String,
    pub date_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDescriptor {
    pub label: String,
    #[serde(rename = "dbLabel")]
    pub db_label: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sco: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    pub from: String,
    pub to: String,
}

/// Static description of the node and edge types one adapter can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    #[serde(rename = "_meta")]
    pub meta: SchemaMeta,
    pub name: String,
    pub key: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub concepts: BTreeMap<String, ConceptDescriptor>,
    pub relationships: BTreeMap<String, RelationshipSchema>,
}

/// Name, key and description of the datapack an adapter run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapackInfo {
    pub name: String,
    pub key: String,
    pub description: String,
    pub date_updated: String,
}

impl DatapackInfo {
    pub fn new(name: impl Into<String>, key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            description: description.into(),
            date_updated: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_date(mut self, date_updated: impl Into<String>) -> Self {
        self.date_updated = date_updated.into();
        self
    }
}

impl SchemaDescription {
    pub fn new(info: &DatapackInfo) -> Self {
        Self {
            meta: SchemaMeta {
                version: SCHEMA_VERSION.to_string(),
                date_updated: info.date_updated.clone(),
            },
            name: info.name.clone(),
            key: info.key.clone(),
            description: info.description.clone(),
            dependencies: Vec::new(),
            concepts: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn concept(mut self, label: &str, db_label: &str, definition: &str) -> Self {
        self.concepts.insert(
            db_label.to_string(),
            ConceptDescriptor {
                label: label.to_string(),
                db_label: db_label.to_string(),
                definition: definition.to_string(),
                sco: None,
            },
        );
        self
    }

    /// Concept that is a sub-class of `parent`.
    pub fn sub_concept(mut self, db_label: &str, parent: &str, definition: &str) -> Self {
        self.concepts.insert(
            db_label.to_string(),
            ConceptDescriptor {
                label: db_label.to_string(),
                db_label: db_label.to_string(),
                definition: definition.to_string(),
                sco: Some(parent.to_string()),
            },
        );
        self
    }

    pub fn relationship(mut self, label: &str, from: &str, to: &str) -> Self {
        self.relationships.insert(
            label.to_string(),
            RelationshipSchema {
                from: from.to_string(),
                to: to.to_string(),
            },
        );
        self
    }
}
