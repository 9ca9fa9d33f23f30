use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Service lifecycle
        .route(
            "/services/:service_id",
            post(handlers::create_service::<S>).delete(handlers::delete_service::<S>),
        )
        // Schema queries
        .route("/services/:service_id/schema", get(handlers::get_schema::<S>))
        .route(
            "/services/:service_id/operations",
            get(handlers::list_operations::<S>),
        )
        .route(
            "/services/:service_id/components",
            get(handlers::list_components::<S>),
        )
        .route(
            "/services/:service_id/openapi",
            get(handlers::export_openapi::<S>),
        )
        // Import
        .route(
            "/services/:service_id/import",
            post(handlers::import_document::<S>),
        )
        // Sync registry
        .route(
            "/services/:service_id/sync-configs",
            get(handlers::list_sync_configs::<S>).post(handlers::upsert_sync_config::<S>),
        )
        .route(
            "/services/:service_id/sync-configs/:name",
            get(handlers::get_sync_config::<S>).delete(handlers::delete_sync_config::<S>),
        )
        .route(
            "/services/:service_id/sync-configs/:name/run",
            post(handlers::run_sync_config::<S>),
        )
        .route(
            "/services/:service_id/sync",
            post(handlers::run_service_sync::<S>),
        )
}
