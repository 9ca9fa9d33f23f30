use std::time::Duration;

use log::debug;

use crate::error::ReconcileError;
use crate::model::{SyncConfig, SyncCredential};

/// Retrieves the raw document behind a sync config
#[async_trait::async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, config: &SyncConfig) -> Result<Vec<u8>, ReconcileError>;
}

/// Fetches remote documents over HTTP with the config's credentials
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ReconcileError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::remote_fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, config: &SyncConfig) -> Result<Vec<u8>, ReconcileError> {
        let mut request = self.client.get(&config.url);
        for credential in &config.credentials {
            request = match credential {
                SyncCredential::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
                SyncCredential::Bearer { token } => request.bearer_auth(token),
                SyncCredential::Header { name, value } => request.header(name.as_str(), value.as_str()),
                SyncCredential::Query { name, value } => request.query(&[(name, value)]),
            };
        }

        debug!("Fetching {} for sync config {}", config.url, config.name);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ReconcileError::remote_fetch(format!("request to {} timed out", config.url))
            } else {
                ReconcileError::remote_fetch(format!("request to {} failed: {e}", config.url))
            }
        })?;

        if !response.status().is_success() {
            return Err(ReconcileError::remote_fetch(format!(
                "{} responded with status {}",
                config.url,
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            ReconcileError::remote_fetch(format!("failed to read body from {}: {e}", config.url))
        })?;
        Ok(body.to_vec())
    }
}
