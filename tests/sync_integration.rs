use apisync::error::SyncError;
use apisync::logic::{HttpFetcher, Reconciler, SyncService};
use apisync::model::{HttpMethod, OperationKey, Strategy, SyncConfig, SyncCredential};
use apisync::store::schema_cache::InMemorySchemaCache;
use apisync::store::traits::{ServiceStore, SyncConfigStore};
use apisync::store::MemoryStore;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};

const ORDERS_DOCUMENT: &str = r#"{
    "openapi": "3.0.1",
    "info": {"title": "Orders", "version": "1.4"},
    "servers": [{"url": "https://orders.example.com", "x-server-id": 7}],
    "paths": {
        "/orders": {
            "get": {"summary": "list orders", "responses": {"200": {"description": "ok"}}},
            "post": {"summary": "create order", "responses": {"201": {"description": "created"}}}
        }
    },
    "components": {"schemas": {"Order": {"type": "object"}}}
}"#;

// Upstream stand-in: /orders requires an api key, /slow never answers in time
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route(
            "/orders",
            get(|headers: HeaderMap| async move {
                match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
                    Some("secret") => Ok(ORDERS_DOCUMENT),
                    _ => Err(StatusCode::UNAUTHORIZED),
                }
            }),
        )
        .route(
            "/slow",
            get(|| async {
                sleep(Duration::from_secs(5)).await;
                ORDERS_DOCUMENT
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

fn sync_service(store: Arc<MemoryStore>, cause_limit: usize) -> SyncService<MemoryStore> {
    let reconciler = Reconciler::new(store, Arc::new(InMemorySchemaCache::new()));
    let fetcher = HttpFetcher::new(Duration::from_millis(300)).unwrap();
    SyncService::new(reconciler, Arc::new(fetcher)).with_cause_limit(cause_limit)
}

fn config(service_id: &str, name: &str, url: String) -> SyncConfig {
    let mut config = SyncConfig::new(service_id.to_string(), name.to_string(), url);
    config.strategy = Strategy::Cover;
    config
}

#[tokio::test]
async fn test_bulk_sync_isolates_failures_per_config() {
    let base_url = spawn_upstream().await;
    let store = Arc::new(MemoryStore::new());
    let orders = "orders".to_string();
    let billing = "billing".to_string();
    store.create_service(&orders).await.unwrap();
    store.create_service(&billing).await.unwrap();

    let mut healthy = config("orders", "upstream", format!("{base_url}/orders"));
    healthy.credentials = vec![SyncCredential::Header {
        name: "x-api-key".to_string(),
        value: "secret".to_string(),
    }];
    store.upsert_sync_config(healthy).await.unwrap();
    store
        .upsert_sync_config(config("billing", "upstream", format!("{base_url}/slow")))
        .await
        .unwrap();

    let service = sync_service(store.clone(), 16);
    let error = service.run_all().await.unwrap_err();

    match error {
        SyncError::PartialFailure { attempted, failed } => {
            assert_eq!(attempted, 2);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].service_id, "billing");
            assert_eq!(failed[0].name, "upstream");
            assert!(failed[0].cause.chars().count() <= 16);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }

    // The healthy config was applied despite its neighbour failing
    let operations = store.list_operations(&orders).await.unwrap();
    let mut keys: Vec<OperationKey> = operations.iter().map(|op| op.key()).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            OperationKey::new(HttpMethod::Get, "/orders"),
            OperationKey::new(HttpMethod::Post, "/orders"),
        ]
    );
    assert!(operations
        .iter()
        .all(|op| op.sync_name.as_deref() == Some("upstream")));

    let recorded = store
        .get_sync_config(&orders, "upstream")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recorded.last_sync_success, Some(true));
    assert_eq!(recorded.last_sync_cause, None);

    let recorded = store
        .get_sync_config(&billing, "upstream")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recorded.last_sync_success, Some(false));
    assert!(recorded.last_sync_at.is_some());
    let cause = recorded.last_sync_cause.unwrap();
    assert!(!cause.is_empty());
    assert!(cause.chars().count() <= 16);

    assert!(store.list_operations(&billing).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_credentials_are_recorded_as_failure() {
    let base_url = spawn_upstream().await;
    let store = Arc::new(MemoryStore::new());
    let orders = "orders".to_string();
    store.create_service(&orders).await.unwrap();
    store
        .upsert_sync_config(config("orders", "upstream", format!("{base_url}/orders")))
        .await
        .unwrap();

    let service = sync_service(store.clone(), 512);
    let result = service.run_sync(&orders, "upstream").await.unwrap();

    assert!(!result.success);
    assert!(result.failure_cause.unwrap().contains("401"));
    assert!(store.list_operations(&orders).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let base_url = spawn_upstream().await;
    let store = Arc::new(MemoryStore::new());
    let orders = "orders".to_string();
    store.create_service(&orders).await.unwrap();

    let mut upstream = config("orders", "upstream", format!("{base_url}/orders"));
    upstream.credentials = vec![SyncCredential::Header {
        name: "x-api-key".to_string(),
        value: "secret".to_string(),
    }];
    store.upsert_sync_config(upstream).await.unwrap();

    let service = sync_service(store.clone(), 512);
    let first = service.run_sync(&orders, "upstream").await.unwrap();
    assert!(first.success);
    assert_eq!(first.report.unwrap().operations.created.len(), 2);

    let second = service.run_sync(&orders, "upstream").await.unwrap();
    assert!(second.success);
    let report = second.report.unwrap();
    assert!(report.operations.created.is_empty());
    assert!(report.operations.updated.is_empty());
    assert!(report.operations.deleted.is_empty());

    let document = store.get_schema_document(&orders).await.unwrap().unwrap();
    assert_eq!(document.servers.len(), 1);
    assert_eq!(document.servers[0].id, Some(7));
}
