pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export error types
pub use error::{FailedSync, ReconcileError, SyncError};

// Export logic types
pub use logic::{
    parse_document, ChangeSink, HttpFetcher, LogChangeSink, Reconciler, RemoteFetcher,
    SyncScheduler, SyncService,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

use std::sync::Arc;

use crate::api::handlers::AppState;
use crate::config::AppConfig;
use crate::store::schema_cache::{InMemorySchemaCache, NoopSchemaCache, SchemaCache};

/// Wire the reconciler and sync service on top of `store` as configured
pub fn build_state<S: Store + 'static>(
    store: Arc<S>,
    config: &AppConfig,
) -> anyhow::Result<AppState<S>> {
    let cache: Arc<dyn SchemaCache> = if config.cache.enabled {
        Arc::new(InMemorySchemaCache::with_ttl(std::time::Duration::from_secs(
            config.cache.ttl_secs,
        )))
    } else {
        Arc::new(NoopSchemaCache)
    };

    let reconciler = Reconciler::new(store, cache).with_sink(Arc::new(LogChangeSink));
    let fetcher = HttpFetcher::new(config.sync.fetch_timeout())?;
    let sync = SyncService::new(reconciler.clone(), Arc::new(fetcher))
        .with_cause_limit(config.sync.failure_cause_limit);

    Ok(AppState::new(reconciler, sync))
}

/// Connect to Postgres, start the sync scheduler when enabled and serve the
/// HTTP surface until ctrl-c
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use log::info;
    use tokio::net::TcpListener;

    info!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url, config.max_connections()).await?;

    info!("Running database migrations...");
    postgres_store.migrate().await?;

    let state = build_state(Arc::new(postgres_store), &config)?;

    let scheduler = if config.sync.enabled {
        info!("Scheduled sync every {}s", config.sync.interval().as_secs());
        Some(SyncScheduler::spawn(
            state.sync.clone(),
            config.sync.interval(),
        ))
    } else {
        info!("Scheduled sync disabled");
        None
    };

    // Create router with state
    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("apisync server running on http://{}", bind_address);

    serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {

    #[tokio::test]
    async fn test_sync_config_without_outcome_fields_deserializes() {
        use crate::model::{Strategy, SyncConfig};

        // Configs stored before any run carry no outcome fields
        let json = r#"{
            "service_id": "svc",
            "name": "upstream",
            "url": "https://example.com/openapi.yaml",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;

        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strategy, Strategy::Ignore);
        assert!(config.credentials.is_empty());
        assert_eq!(config.last_sync_success, None);
        assert_eq!(config.last_sync_at, None);
    }

    #[tokio::test]
    async fn test_new_sync_config_defaults_to_cover() {
        use crate::model::{NewSyncConfig, Strategy, SyncCredential};

        let json = r#"{
            "name": "upstream",
            "url": "https://example.com/openapi.json",
            "credentials": [
                {"type": "bearer", "token": "secret"},
                {"type": "header", "name": "X-Api-Key", "value": "k"}
            ]
        }"#;

        let new_config: NewSyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(new_config.strategy, Strategy::Cover);
        assert!(!new_config.delete_when_absent);
        assert_eq!(
            new_config.credentials[0],
            SyncCredential::Bearer {
                token: "secret".to_string()
            }
        );

        let config = new_config.into_config("svc".to_string());
        assert_eq!(config.service_id, "svc");
        assert_eq!(config.credentials.len(), 2);
    }

    #[tokio::test]
    async fn test_policy_and_status_wire_format() {
        use crate::model::{ApiSource, ApiStatus, HttpMethod, OperationKey, Strategy};

        assert_eq!(serde_json::to_string(&Strategy::Cover).unwrap(), "\"cover\"");
        assert_eq!(serde_json::to_string(&ApiStatus::Released).unwrap(), "\"released\"");
        assert_eq!(serde_json::to_string(&ApiSource::Sync).unwrap(), "\"sync\"");

        let key: OperationKey = serde_json::from_str(r#"{"method": "PATCH", "path": "/a"}"#).unwrap();
        assert_eq!(key, OperationKey::new(HttpMethod::Patch, "/a"));
    }

    #[tokio::test]
    async fn test_build_state_honours_cache_setting() {
        use crate::config::AppConfig;
        use crate::store::traits::ServiceStore;
        use crate::store::MemoryStore;
        use std::sync::Arc;

        let mut config = AppConfig::default();
        config.cache.enabled = false;

        let store = Arc::new(MemoryStore::new());
        store.create_service(&"svc".to_string()).await.unwrap();
        let state = super::build_state(store, &config).unwrap();

        let schema = state.reconciler.load_schema(&"svc".to_string()).await.unwrap();
        assert_eq!(schema.unwrap().document.service_id, "svc");
    }
}
