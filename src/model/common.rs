use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type Id = String;

/// Vendor extension fields (`x-*`) carried alongside a document element
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// Security requirement: scheme name -> required scopes
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Reference to external documentation, shared by the document root and tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDocs {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Keep only the `x-` prefixed entries of a loosely typed field bag
pub fn collect_extensions(fields: BTreeMap<String, serde_json::Value>) -> Extensions {
    fields
        .into_iter()
        .filter(|(key, _)| key.starts_with("x-"))
        .collect()
}
