use serde::{Deserialize, Serialize};

use crate::model::{ApiSource, SyncConfig};

/// Duplicate-resolution strategy for entities present on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Overwrite persisted entities whose content changed
    Cover,
    /// Keep persisted entities as they are
    #[default]
    Ignore,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Cover => "cover",
            Strategy::Ignore => "ignore",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cover" => Some(Strategy::Cover),
            "ignore" => Some(Strategy::Ignore),
            _ => None,
        }
    }
}

/// Per-invocation reconciliation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub strategy: Strategy,
    pub delete_when_absent: bool,
    /// Apply updates and deletions without asking for confirmation
    pub forced: bool,
    /// Sync config name owning the incoming operations; bounds deletions
    pub source_scope: Option<String>,
    pub api_source: ApiSource,
    /// Caller is authorized to change released operations
    pub allow_released_changes: bool,
}

impl ReconcilePolicy {
    /// Interactive import of an uploaded document
    pub fn import(strategy: Strategy) -> Self {
        Self {
            strategy,
            delete_when_absent: false,
            forced: false,
            source_scope: None,
            api_source: ApiSource::Import,
            allow_released_changes: false,
        }
    }

    /// Unattended sync: no human to confirm, so changes are always forced
    pub fn sync(config: &SyncConfig) -> Self {
        Self {
            strategy: config.strategy,
            delete_when_absent: config.delete_when_absent,
            forced: true,
            source_scope: Some(config.name.clone()),
            api_source: ApiSource::Sync,
            allow_released_changes: true,
        }
    }

    pub fn with_forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    pub fn with_delete_when_absent(mut self, delete_when_absent: bool) -> Self {
        self.delete_when_absent = delete_when_absent;
        self
    }

    pub fn with_released_changes(mut self, allow: bool) -> Self {
        self.allow_released_changes = allow;
        self
    }
}
