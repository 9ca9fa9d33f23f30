use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{generate_id, now_rfc3339, Extensions, Id, SecurityRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Case-insensitive lookup, as path items use lowercase method keys
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an operation within a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    pub method: HttpMethod,
    pub path: String,
}

impl OperationKey {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    #[default]
    Draft,
    Released,
}

impl ApiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Draft => "draft",
            ApiStatus::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "released" => ApiStatus::Released,
            _ => ApiStatus::Draft, // Default fallback
        }
    }
}

/// Where an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiSource {
    #[default]
    Editor,
    Import,
    Sync,
}

impl ApiSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiSource::Editor => "editor",
            ApiSource::Import => "import",
            ApiSource::Sync => "sync",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "import" => ApiSource::Import,
            "sync" => ApiSource::Sync,
            _ => ApiSource::Editor,
        }
    }
}

/// Client-visible content of an operation; everything here feeds the fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OperationContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default)]
    pub responses: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<SecurityRequirement>>,
    #[serde(default)]
    pub extensions: Extensions,
}

/// A persisted API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Id,
    pub service_id: Id,
    pub method: HttpMethod,
    pub path: String,
    pub content: OperationContent,
    pub fingerprint: i64,
    pub status: ApiStatus,
    pub source: ApiSource,
    /// Name of the sync config that produced this operation (None for editor/import)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_at: String, // ISO 8601 timestamp
}

impl Operation {
    /// New draft operation produced by reconciliation or manual authoring
    pub fn new(
        service_id: Id,
        key: OperationKey,
        content: OperationContent,
        fingerprint: i64,
        source: ApiSource,
        sync_name: Option<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            id: generate_id(),
            service_id,
            method: key.method,
            path: key.path,
            content,
            fingerprint,
            status: ApiStatus::Draft,
            source,
            sync_name,
            deleted: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::new(self.method, self.path.clone())
    }

    pub fn is_released(&self) -> bool {
        self.status == ApiStatus::Released
    }

    pub fn mark_released(&mut self) {
        self.status = ApiStatus::Released;
        self.updated_at = now_rfc3339();
    }
}
