//! Named remote sources: on-demand and scheduled re-synchronization.

use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::error::{FailedSync, ReconcileError, SyncError};
use crate::logic::fetch::RemoteFetcher;
use crate::logic::parse::parse_document;
use crate::logic::reconcile::Reconciler;
use crate::model::{Id, ReconcilePolicy, ReconcileReport, SyncConfig, SyncResult};
use crate::store::traits::Store;

/// Default bound on the failure cause stored on a sync config
pub const DEFAULT_FAILURE_CAUSE_LIMIT: usize = 512;

/// Shorten `cause` to at most `limit` characters
pub fn truncate_cause(cause: &str, limit: usize) -> String {
    match cause.char_indices().nth(limit) {
        Some((end, _)) => cause[..end].to_string(),
        None => cause.to_string(),
    }
}

/// Runs sync configs: fetch, parse, reconcile, record the outcome
pub struct SyncService<S: Store> {
    store: Arc<S>,
    reconciler: Reconciler<S>,
    fetcher: Arc<dyn RemoteFetcher>,
    cause_limit: usize,
}

impl<S: Store> Clone for SyncService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            reconciler: self.reconciler.clone(),
            fetcher: self.fetcher.clone(),
            cause_limit: self.cause_limit,
        }
    }
}

impl<S: Store + 'static> SyncService<S> {
    pub fn new(reconciler: Reconciler<S>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            store: reconciler.store().clone(),
            reconciler,
            fetcher,
            cause_limit: DEFAULT_FAILURE_CAUSE_LIMIT,
        }
    }

    pub fn with_cause_limit(mut self, cause_limit: usize) -> Self {
        self.cause_limit = cause_limit;
        self
    }

    /// Run one named config of a service.
    ///
    /// A failed fetch, parse or reconciliation is not an error here: it is
    /// recorded on the config and returned in the result.
    pub async fn run_sync(&self, service_id: &Id, name: &str) -> Result<SyncResult, SyncError> {
        let config = self
            .store
            .get_sync_config(service_id, name)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                service_id: service_id.clone(),
                name: name.to_string(),
            })?;
        Ok(self.run_isolated(config).await)
    }

    /// Run every config of one service, serially in name order
    pub async fn run_service(&self, service_id: &Id) -> Result<Vec<SyncResult>, SyncError> {
        let mut configs = self.store.list_sync_configs(service_id).await?;
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        let results = self.run_configs(configs).await;
        aggregate(results)
    }

    /// Run every registered config: services in parallel, configs of one
    /// service serially. All configs are attempted before failures are reported.
    pub async fn run_all(&self) -> Result<Vec<SyncResult>, SyncError> {
        let configs = self.store.list_all_sync_configs().await?;
        if configs.is_empty() {
            debug!("No sync configs registered");
            return Ok(Vec::new());
        }

        let by_service = configs
            .into_iter()
            .into_group_map_by(|config| config.service_id.clone());

        let mut tasks: Vec<(Vec<SyncConfig>, JoinHandle<Vec<SyncResult>>)> = Vec::new();
        for (_, mut configs) in by_service {
            configs.sort_by(|a, b| a.name.cmp(&b.name));
            let service = self.clone();
            let batch = configs.clone();
            tasks.push((
                configs,
                tokio::spawn(async move { service.run_configs(batch).await }),
            ));
        }

        let mut results = Vec::new();
        for (configs, task) in tasks {
            match task.await {
                Ok(batch) => results.extend(batch),
                Err(e) => {
                    error!("Sync task aborted: {}", e);
                    for config in &configs {
                        results.push(self.record_aborted(config, &e).await);
                    }
                }
            }
        }
        aggregate(results)
    }

    async fn run_configs(&self, configs: Vec<SyncConfig>) -> Vec<SyncResult> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            results.push(self.run_isolated(config).await);
        }
        results
    }

    /// Run one config on its own task so a panic stays with that config
    async fn run_isolated(&self, config: SyncConfig) -> SyncResult {
        let service = self.clone();
        let task_config = config.clone();
        match tokio::spawn(async move { service.run_config(&task_config).await }).await {
            Ok(result) => result,
            Err(e) => self.record_aborted(&config, &e).await,
        }
    }

    async fn record_aborted(&self, config: &SyncConfig, e: &JoinError) -> SyncResult {
        error!("Sync {}/{} aborted: {}", config.service_id, config.name, e);
        let cause = truncate_cause(&format!("sync task aborted: {e}"), self.cause_limit);
        let result = SyncResult::failed(config, cause);
        self.record(config, &result).await;
        result
    }

    async fn run_config(&self, config: &SyncConfig) -> SyncResult {
        let result = match self.sync_once(config).await {
            Ok(report) => {
                info!(
                    "Sync {}/{} succeeded ({} operation change(s))",
                    config.service_id,
                    config.name,
                    report.operations.len()
                );
                SyncResult::succeeded(config, report)
            }
            Err(e) => {
                warn!("Sync {}/{} failed: {}", config.service_id, config.name, e);
                SyncResult::failed(config, truncate_cause(&e.to_string(), self.cause_limit))
            }
        };

        self.record(config, &result).await;
        result
    }

    async fn record(&self, config: &SyncConfig, result: &SyncResult) {
        match self.store.record_sync_result(result).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Sync config {}/{} was removed during its run",
                config.service_id, config.name
            ),
            Err(e) => error!(
                "Failed to record sync outcome for {}/{}: {:#}",
                config.service_id, config.name, e
            ),
        }
    }

    async fn sync_once(&self, config: &SyncConfig) -> Result<ReconcileReport, ReconcileError> {
        let bytes = self.fetcher.fetch(config).await?;
        let document = parse_document(&bytes)?;
        self.reconciler
            .reconcile(&config.service_id, document, &ReconcilePolicy::sync(config))
            .await
    }
}

fn aggregate(results: Vec<SyncResult>) -> Result<Vec<SyncResult>, SyncError> {
    let failed: Vec<FailedSync> = results
        .iter()
        .filter(|result| !result.success)
        .map(|result| FailedSync {
            service_id: result.service_id.clone(),
            name: result.name.clone(),
            cause: result.failure_cause.clone().unwrap_or_default(),
        })
        .collect();

    if failed.is_empty() {
        Ok(results)
    } else {
        Err(SyncError::PartialFailure {
            attempted: results.len(),
            failed,
        })
    }
}

/// Background task running every registered sync config on a fixed interval
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn spawn<S: Store + 'static>(service: SyncService<S>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Sync scheduler started, interval {:?}", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.run_all().await {
                            Ok(results) => debug!("Scheduled sync ran {} config(s)", results.len()),
                            Err(e) => warn!("Scheduled sync: {}", e),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Sync scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the scheduler, letting a run in progress finish first
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Sync scheduler task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMethod, OperationKey};
    use crate::store::memory::MemoryStore;
    use crate::store::schema_cache::NoopSchemaCache;
    use crate::store::traits::{ServiceStore, SyncConfigStore};
    use std::collections::{HashMap, HashSet};

    /// Serves canned bodies by URL; unknown URLs fail like an unreachable host
    #[derive(Default)]
    struct FakeFetcher {
        bodies: HashMap<String, Vec<u8>>,
        crashing: HashSet<String>,
    }

    impl FakeFetcher {
        fn serve(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.as_bytes().to_vec());
            self
        }

        fn crash_on(mut self, url: &str) -> Self {
            self.crashing.insert(url.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl RemoteFetcher for FakeFetcher {
        async fn fetch(&self, config: &SyncConfig) -> Result<Vec<u8>, ReconcileError> {
            if self.crashing.contains(&config.url) {
                panic!("fetcher crashed on {}", config.url);
            }
            self.bodies.get(&config.url).cloned().ok_or_else(|| {
                ReconcileError::remote_fetch(format!("request to {} timed out", config.url))
            })
        }
    }

    fn document(path: &str) -> String {
        format!(
            r#"{{"openapi": "3.0.0", "info": {{"title": "t", "version": "1"}},
               "paths": {{"{path}": {{"get": {{"responses": {{"200": {{"description": "ok"}}}}}}}}}}}}"#
        )
    }

    async fn setup(fetcher: FakeFetcher) -> (SyncService<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_service(&"svc".to_string()).await.unwrap();
        let reconciler = Reconciler::new(store.clone(), Arc::new(NoopSchemaCache));
        (SyncService::new(reconciler, Arc::new(fetcher)), store)
    }

    async fn register(store: &MemoryStore, service_id: &str, name: &str, url: &str) {
        let config = SyncConfig::new(service_id.to_string(), name.to_string(), url.to_string());
        store.upsert_sync_config(config).await.unwrap();
    }

    #[test]
    fn test_truncate_cause_respects_char_boundaries() {
        assert_eq!(truncate_cause("short", 512), "short");
        assert_eq!(truncate_cause("abcdef", 3), "abc");
        assert_eq!(truncate_cause("ééé", 2), "éé");
        assert_eq!(truncate_cause("", 0), "");
    }

    #[tokio::test]
    async fn test_run_sync_applies_document_and_records_success() {
        let (service, store) = setup(FakeFetcher::default().serve("http://y", &document("/y"))).await;
        register(&store, "svc", "y", "http://y").await;

        let result = service.run_sync(&"svc".to_string(), "y").await.unwrap();
        assert!(result.success);

        let operations = store.list_operations(&"svc".to_string()).await.unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].key(), OperationKey::new(HttpMethod::Get, "/y"));
        assert_eq!(operations[0].sync_name.as_deref(), Some("y"));

        let config = store.get_sync_config(&"svc".to_string(), "y").await.unwrap().unwrap();
        assert_eq!(config.last_sync_success, Some(true));
        assert!(config.last_sync_at.is_some());
        assert_eq!(config.last_sync_cause, None);
    }

    #[tokio::test]
    async fn test_failure_cause_is_truncated_and_recorded() {
        let (service, store) = setup(FakeFetcher::default()).await;
        let service = service.with_cause_limit(10);
        register(&store, "svc", "x", "http://x").await;

        let result = service.run_sync(&"svc".to_string(), "x").await.unwrap();
        assert!(!result.success);

        let config = store.get_sync_config(&"svc".to_string(), "x").await.unwrap().unwrap();
        assert_eq!(config.last_sync_success, Some(false));
        assert!(config.last_sync_at.is_some());
        let cause = config.last_sync_cause.unwrap();
        assert_eq!(cause.chars().count(), 10);
    }

    #[tokio::test]
    async fn test_unknown_config_is_not_found() {
        let (service, _store) = setup(FakeFetcher::default()).await;
        let err = service.run_sync(&"svc".to_string(), "missing").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_bulk_run_reports_only_failed_configs() {
        let (service, store) = setup(FakeFetcher::default().serve("http://y", &document("/y"))).await;
        register(&store, "svc", "x", "http://x").await;
        register(&store, "svc", "y", "http://y").await;
        store.create_service(&"other".to_string()).await.unwrap();
        register(&store, "other", "z", "http://y").await;

        let err = service.run_all().await.unwrap_err();
        match err {
            SyncError::PartialFailure { attempted, failed } => {
                assert_eq!(attempted, 3);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].name, "x");
                assert!(failed[0].cause.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(store.list_operations(&"svc".to_string()).await.unwrap().len(), 1);
        assert_eq!(store.list_operations(&"other".to_string()).await.unwrap().len(), 1);
        let y = store.get_sync_config(&"svc".to_string(), "y").await.unwrap().unwrap();
        assert_eq!(y.last_sync_success, Some(true));
    }

    #[tokio::test]
    async fn test_run_service_succeeds_when_all_configs_do() {
        let fetcher = FakeFetcher::default()
            .serve("http://a", &document("/a"))
            .serve("http://b", &document("/b"));
        let (service, store) = setup(fetcher).await;
        register(&store, "svc", "b", "http://b").await;
        register(&store, "svc", "a", "http://a").await;

        let results = service.run_service(&"svc".to_string()).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.list_operations(&"svc".to_string()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scheduler_runs_until_shutdown() {
        let (service, store) = setup(FakeFetcher::default().serve("http://y", &document("/y"))).await;
        register(&store, "svc", "y", "http://y").await;

        let scheduler = SyncScheduler::spawn(service, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        let config = store.get_sync_config(&"svc".to_string(), "y").await.unwrap().unwrap();
        assert_eq!(config.last_sync_success, Some(true));
    }

    #[tokio::test]
    async fn test_crashed_config_is_recorded_and_does_not_block_the_next() {
        let fetcher = FakeFetcher::default()
            .crash_on("http://a")
            .serve("http://b", &document("/b"));
        let (service, store) = setup(fetcher).await;
        register(&store, "svc", "a", "http://a").await;
        register(&store, "svc", "b", "http://b").await;

        let err = service.run_all().await.unwrap_err();
        match err {
            SyncError::PartialFailure { attempted, failed } => {
                assert_eq!(attempted, 2);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].name, "a");
                assert!(failed[0].cause.contains("aborted"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let a = store.get_sync_config(&"svc".to_string(), "a").await.unwrap().unwrap();
        assert_eq!(a.last_sync_success, Some(false));
        assert!(a.last_sync_at.is_some());
        assert!(a.last_sync_cause.unwrap().contains("aborted"));

        let b = store.get_sync_config(&"svc".to_string(), "b").await.unwrap().unwrap();
        assert_eq!(b.last_sync_success, Some(true));
        assert!(b.last_sync_at.is_some());
        assert_eq!(store.list_operations(&"svc".to_string()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_run_records_crash() {
        let (service, store) = setup(FakeFetcher::default().crash_on("http://a")).await;
        register(&store, "svc", "a", "http://a").await;

        let result = service.run_sync(&"svc".to_string(), "a").await.unwrap();
        assert!(!result.success);

        let a = store.get_sync_config(&"svc".to_string(), "a").await.unwrap().unwrap();
        assert_eq!(a.last_sync_success, Some(false));
        assert!(a.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_server_identity_fails_only_that_config() {
        let exhausted = format!(
            r#"{{"openapi": "3.0.0", "info": {{"title": "t", "version": "1"}},
               "servers": [{{"url": "https://a", "x-server-id": {}}}, {{"url": "https://b"}}],
               "paths": {{}}}}"#,
            i64::MAX
        );
        let fetcher = FakeFetcher::default()
            .serve("http://a", &exhausted)
            .serve("http://b", &document("/b"));
        let (service, store) = setup(fetcher).await;
        register(&store, "svc", "a", "http://a").await;
        register(&store, "svc", "b", "http://b").await;

        let err = service.run_all().await.unwrap_err();
        match err {
            SyncError::PartialFailure { failed, .. } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].name, "a");
                assert!(failed[0].cause.contains("ids exhausted"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let a = store.get_sync_config(&"svc".to_string(), "a").await.unwrap().unwrap();
        assert_eq!(a.last_sync_success, Some(false));
        let b = store.get_sync_config(&"svc".to_string(), "b").await.unwrap().unwrap();
        assert_eq!(b.last_sync_success, Some(true));

        // The failed reconciliation left the root untouched
        let document = store.get_schema_document(&"svc".to_string()).await.unwrap().unwrap();
        assert!(document.servers.is_empty());
    }
}
