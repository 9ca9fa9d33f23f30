use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{now_rfc3339, Id, ReconcileReport, Strategy};

/// Credential applied to remote fetch requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncCredential {
    Basic { username: String, password: String },
    Bearer { token: String },
    Header { name: String, value: String },
    Query { name: String, value: String },
}

/// A named remote source bound to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub service_id: Id,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub credentials: Vec<SyncCredential>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub delete_when_absent: bool,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sync_success: Option<bool>,
    #[serde(default)]
    pub last_sync_cause: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
}

impl SyncConfig {
    pub fn new(service_id: Id, name: String, url: String) -> Self {
        Self {
            service_id,
            name,
            url,
            credentials: Vec::new(),
            strategy: Strategy::Cover,
            delete_when_absent: false,
            last_sync_at: None,
            last_sync_success: None,
            last_sync_cause: None,
            created_at: now_rfc3339(),
        }
    }

    /// Store the outcome of a sync run on this config
    pub fn record(&mut self, result: &SyncResult) {
        self.last_sync_at = Some(result.synced_at);
        self.last_sync_success = Some(result.success);
        self.last_sync_cause = result.failure_cause.clone();
    }

    /// Carry the last outcome over when a config is replaced by its owner
    pub fn inherit_outcome(&mut self, previous: &SyncConfig) {
        self.last_sync_at = previous.last_sync_at;
        self.last_sync_success = previous.last_sync_success;
        self.last_sync_cause = previous.last_sync_cause.clone();
        self.created_at = previous.created_at.clone();
    }
}

/// Input model for creating or replacing a sync config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub credentials: Vec<SyncCredential>,
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    #[serde(default)]
    pub delete_when_absent: bool,
}

fn default_strategy() -> Strategy {
    Strategy::Cover
}

impl NewSyncConfig {
    pub fn into_config(self, service_id: Id) -> SyncConfig {
        let mut config = SyncConfig::new(service_id, self.name, self.url);
        config.credentials = self.credentials;
        config.strategy = self.strategy;
        config.delete_when_absent = self.delete_when_absent;
        config
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub service_id: Id,
    pub name: String,
    pub success: bool,
    pub failure_cause: Option<String>,
    pub synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconcileReport>,
}

impl SyncResult {
    pub fn succeeded(config: &SyncConfig, report: ReconcileReport) -> Self {
        Self {
            service_id: config.service_id.clone(),
            name: config.name.clone(),
            success: true,
            failure_cause: None,
            synced_at: Utc::now(),
            report: Some(report),
        }
    }

    pub fn failed(config: &SyncConfig, cause: String) -> Self {
        Self {
            service_id: config.service_id.clone(),
            name: config.name.clone(),
            success: false,
            failure_cause: Some(cause),
            synced_at: Utc::now(),
            report: None,
        }
    }
}
