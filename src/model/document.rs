use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    ComponentContent, Extensions, ExternalDocs, Id, OperationContent, OperationKey,
    SecurityRequirement,
};

/// Document-level metadata of a service's API description.
/// Exactly one exists per live service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub service_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_docs: Option<ExternalDocs>,
    #[serde(default)]
    pub security: Vec<SecurityRequirement>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub extensions: Extensions,
    pub updated_at: String, // ISO 8601 timestamp
}

impl SchemaDocument {
    /// Empty document created alongside a new service
    pub fn empty(service_id: Id) -> Self {
        Self {
            service_id,
            info: None,
            external_docs: None,
            security: Vec::new(),
            servers: Vec::new(),
            tags: Vec::new(),
            extensions: Extensions::new(),
            updated_at: crate::model::now_rfc3339(),
        }
    }

    pub fn get_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name == name)
    }

    pub fn get_server(&self, id: i64) -> Option<&Server> {
        self.servers.iter().find(|server| server.id == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<serde_json::Value>,
    #[serde(default)]
    pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Assigned numeric identity, used to match servers across imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_docs: Option<ExternalDocs>,
    #[serde(default)]
    pub extensions: Extensions,
}

/// Root fields of an incoming document. `None` means the field was absent
/// and the persisted value is left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootPatch {
    pub info: Option<Info>,
    pub external_docs: Option<ExternalDocs>,
    pub security: Option<Vec<SecurityRequirement>>,
    pub servers: Option<Vec<Server>>,
    pub tags: Option<Vec<Tag>>,
    pub extensions: Option<Extensions>,
}

/// A specification document after parsing, keyed for reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub root: RootPatch,
    /// Component definitions keyed by reference (`#/components/<kind>/<name>`)
    pub components: BTreeMap<String, ComponentContent>,
    pub operations: BTreeMap<OperationKey, OperationContent>,
}

impl ParsedDocument {
    pub fn with_operation(mut self, key: OperationKey, content: OperationContent) -> Self {
        self.operations.insert(key, content);
        self
    }

    pub fn with_component(mut self, content: ComponentContent) -> Self {
        self.components.insert(content.reference(), content);
        self
    }
}
