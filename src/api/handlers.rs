use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{FailedSync, ReconcileError, SyncError};
use crate::logic::{export_document, parse_document, Reconciler, SyncService};
use crate::model::{
    CallerContext, ChangeSet, ComponentDefinition, Id, NewSyncConfig, Operation, OperationKey,
    ReconcilePolicy, ReconcileReport, SchemaDocument, Strategy, SyncConfig, SyncResult,
};
use crate::store::schema_cache::CachedSchema;
use crate::store::traits::{ServiceStore, Store, SyncConfigStore};

/// Shared handler state: the store plus the engines built on it
pub struct AppState<S: Store> {
    pub store: Arc<S>,
    pub reconciler: Reconciler<S>,
    pub sync: SyncService<S>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            reconciler: self.reconciler.clone(),
            sync: self.sync.clone(),
        }
    }
}

impl<S: Store + 'static> AppState<S> {
    pub fn new(reconciler: Reconciler<S>, sync: SyncService<S>) -> Self {
        Self {
            store: reconciler.store().clone(),
            reconciler,
            sync,
        }
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Changes awaiting confirmation (409 responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<ChangeSet<OperationKey>>,
    /// Sync configs that failed in a bulk run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<FailedSync>>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            pending: None,
            failed: None,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(e: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&format!("{e:#}"))),
    )
}

fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message)))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

impl From<ReconcileError> for ErrorResponse {
    fn from(e: ReconcileError) -> Self {
        let message = e.to_string();
        match e {
            ReconcileError::ChangeConfirmationRequired { pending } => Self {
                pending: Some(pending),
                ..Self::new(&message)
            },
            _ => Self::new(&message),
        }
    }
}

fn reconcile_error(e: ReconcileError) -> ApiError {
    let status = match &e {
        ReconcileError::ChangeConfirmationRequired { .. } => StatusCode::CONFLICT,
        ReconcileError::ReleasedOperationLocked { .. } => StatusCode::FORBIDDEN,
        ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
        ReconcileError::RemoteFetch(_) => StatusCode::BAD_GATEWAY,
        ReconcileError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::from(e)))
}

fn sync_error(e: SyncError) -> ApiError {
    let message = e.to_string();
    match e {
        SyncError::NotFound { .. } => not_found(&message),
        SyncError::PartialFailure { failed, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                failed: Some(failed),
                ..ErrorResponse::new(&message)
            }),
        ),
        SyncError::Store(e) => internal_error(e),
    }
}

async fn require_schema<S: Store>(
    state: &AppState<S>,
    service_id: &Id,
) -> Result<CachedSchema, ApiError> {
    state
        .reconciler
        .load_schema(service_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Service not found"))
}

pub async fn create_service<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<(StatusCode, Json<SchemaDocument>), ApiError> {
    let document = state
        .store
        .create_service(&service_id)
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn delete_service<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .store
        .delete_service(&service_id)
        .await
        .map_err(internal_error)?;
    state.reconciler.invalidate(&service_id);

    if !deleted {
        return Err(not_found("Service not found"));
    }
    Ok(Json(serde_json::json!({
        "message": "Service deleted successfully",
        "service_id": service_id
    })))
}

pub async fn get_schema<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<SchemaDocument>, ApiError> {
    let schema = require_schema(&state, &service_id).await?;
    Ok(Json(schema.document))
}

pub async fn list_components<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<ListResponse<ComponentDefinition>>, ApiError> {
    let schema = require_schema(&state, &service_id).await?;
    Ok(Json(ListResponse::new(schema.components)))
}

pub async fn list_operations<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<ListResponse<Operation>>, ApiError> {
    require_schema(&state, &service_id).await?;
    let operations = state
        .store
        .list_operations(&service_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(ListResponse::new(operations)))
}

/// The persisted schema rendered back as an OpenAPI document
pub async fn export_openapi<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schema = require_schema(&state, &service_id).await?;
    let operations = state
        .store
        .list_operations(&service_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(export_document(
        &schema.document,
        &operations,
        &schema.components,
    )))
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub strategy: Option<String>,
    pub delete_when_absent: Option<bool>,
    pub forced: Option<bool>,
}

/// Import an uploaded JSON or YAML document (optionally gzip-compressed)
pub async fn import_document<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
    Query(query): Query<ImportQuery>,
    caller: CallerContext,
    body: Bytes,
) -> Result<Json<ReconcileReport>, ApiError> {
    let strategy = match query.strategy.as_deref() {
        Some(value) => Strategy::parse(value)
            .ok_or_else(|| bad_request(&format!("Unknown strategy: {value}")))?,
        None => Strategy::default(),
    };
    let policy = ReconcilePolicy::import(strategy)
        .with_delete_when_absent(query.delete_when_absent.unwrap_or(false))
        .with_forced(query.forced.unwrap_or(false))
        .with_released_changes(caller.allow_released_changes);

    let document = parse_document(&body).map_err(reconcile_error)?;
    info!(
        "Import into {} by {} ({} operation(s), strategy {})",
        service_id,
        caller.user_id,
        document.operations.len(),
        strategy.as_str()
    );

    let report = state
        .reconciler
        .reconcile(&service_id, document, &policy)
        .await
        .map_err(reconcile_error)?;
    Ok(Json(report))
}

pub async fn list_sync_configs<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
) -> Result<Json<ListResponse<SyncConfig>>, ApiError> {
    require_schema(&state, &service_id).await?;
    let configs = state
        .store
        .list_sync_configs(&service_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(ListResponse::new(configs)))
}

/// Create or replace a sync config; the last outcome survives a replace
pub async fn upsert_sync_config<S: Store>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
    RequestJson(new_config): RequestJson<NewSyncConfig>,
) -> Result<Json<SyncConfig>, ApiError> {
    if new_config.name.trim().is_empty() {
        return Err(bad_request("Sync config name must not be empty"));
    }
    if !(new_config.url.starts_with("http://") || new_config.url.starts_with("https://")) {
        return Err(bad_request("Sync config url must be an http(s) URL"));
    }
    require_schema(&state, &service_id).await?;

    let mut config = new_config.into_config(service_id.clone());
    if let Some(previous) = state
        .store
        .get_sync_config(&service_id, &config.name)
        .await
        .map_err(internal_error)?
    {
        config.inherit_outcome(&previous);
    }

    state
        .store
        .upsert_sync_config(config.clone())
        .await
        .map_err(internal_error)?;
    Ok(Json(config))
}

pub async fn get_sync_config<S: Store>(
    State(state): State<AppState<S>>,
    Path((service_id, name)): Path<(Id, String)>,
) -> Result<Json<SyncConfig>, ApiError> {
    match state.store.get_sync_config(&service_id, &name).await {
        Ok(Some(config)) => Ok(Json(config)),
        Ok(None) => Err(not_found("Sync config not found")),
        Err(e) => Err(internal_error(e)),
    }
}

pub async fn delete_sync_config<S: Store>(
    State(state): State<AppState<S>>,
    Path((service_id, name)): Path<(Id, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.store.delete_sync_config(&service_id, &name).await {
        Ok(true) => Ok(Json(serde_json::json!({
            "message": "Sync config deleted successfully",
            "name": name
        }))),
        Ok(false) => Err(not_found("Sync config not found")),
        Err(e) => Err(internal_error(e)),
    }
}

/// Run one sync config now; a failed run is reported in the result body
pub async fn run_sync_config<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path((service_id, name)): Path<(Id, String)>,
    caller: CallerContext,
) -> Result<Json<SyncResult>, ApiError> {
    info!("Sync {}/{} triggered by {}", service_id, name, caller.user_id);
    let result = state
        .sync
        .run_sync(&service_id, &name)
        .await
        .map_err(sync_error)?;
    Ok(Json(result))
}

/// Run every sync config of a service
pub async fn run_service_sync<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(service_id): Path<Id>,
    caller: CallerContext,
) -> Result<Json<ListResponse<SyncResult>>, ApiError> {
    require_schema(&state, &service_id).await?;
    info!("Sync of all configs of {} triggered by {}", service_id, caller.user_id);
    let results = state
        .sync
        .run_service(&service_id)
        .await
        .map_err(sync_error)?;
    Ok(Json(ListResponse::new(results)))
}
