use serde::{Deserialize, Serialize};

use crate::model::{generate_id, now_rfc3339, Id};

/// Section of `components` a definition lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    Schemas,
    Responses,
    Parameters,
    Examples,
    RequestBodies,
    Headers,
    SecuritySchemes,
    Links,
    Callbacks,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 9] = [
        ComponentKind::Schemas,
        ComponentKind::Responses,
        ComponentKind::Parameters,
        ComponentKind::Examples,
        ComponentKind::RequestBodies,
        ComponentKind::Headers,
        ComponentKind::SecuritySchemes,
        ComponentKind::Links,
        ComponentKind::Callbacks,
    ];

    /// Section name as written in a document
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Schemas => "schemas",
            ComponentKind::Responses => "responses",
            ComponentKind::Parameters => "parameters",
            ComponentKind::Examples => "examples",
            ComponentKind::RequestBodies => "requestBodies",
            ComponentKind::Headers => "headers",
            ComponentKind::SecuritySchemes => "securitySchemes",
            ComponentKind::Links => "links",
            ComponentKind::Callbacks => "callbacks",
        }
    }

    pub fn parse(section: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == section)
    }
}

pub fn component_ref(kind: ComponentKind, name: &str) -> String {
    format!("#/components/{}/{}", kind.as_str(), name)
}

/// Incoming component definition, before it is bound to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentContent {
    pub kind: ComponentKind,
    pub name: String,
    pub model: serde_json::Value,
}

impl ComponentContent {
    pub fn new(kind: ComponentKind, name: impl Into<String>, model: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            model,
        }
    }

    pub fn reference(&self) -> String {
        component_ref(self.kind, &self.name)
    }
}

/// A persisted reusable fragment, unique per (service_id, reference)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: Id,
    pub service_id: Id,
    pub reference: String,
    pub kind: ComponentKind,
    pub name: String,
    pub model: serde_json::Value,
    pub fingerprint: i64,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_at: String, // ISO 8601 timestamp
}

impl ComponentDefinition {
    pub fn new(service_id: Id, content: ComponentContent, fingerprint: i64) -> Self {
        let now = now_rfc3339();
        Self {
            id: generate_id(),
            service_id,
            reference: content.reference(),
            kind: content.kind,
            name: content.name,
            model: content.model,
            fingerprint,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Replace the model content, keeping identity
    pub fn replace_content(&mut self, content: ComponentContent, fingerprint: i64) {
        self.kind = content.kind;
        self.name = content.name;
        self.model = content.model;
        self.fingerprint = fingerprint;
        self.updated_at = now_rfc3339();
    }

    pub fn content(&self) -> ComponentContent {
        ComponentContent::new(self.kind, self.name.clone(), self.model.clone())
    }
}
