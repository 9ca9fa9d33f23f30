use crate::model::{ComponentDefinition, Id, Operation, SchemaDocument, SyncConfig, SyncResult};
use anyhow::Result;

/// Service lifecycle and read-side queries
#[async_trait::async_trait]
pub trait ServiceStore: Send + Sync {
    /// Create the (empty) schema document of a service; returns the existing one if present
    async fn create_service(&self, service_id: &Id) -> Result<SchemaDocument>;
    /// Delete a service's document, operations, components and sync configs
    async fn delete_service(&self, service_id: &Id) -> Result<bool>;
    async fn get_schema_document(&self, service_id: &Id) -> Result<Option<SchemaDocument>>;
    /// Non-deleted operations of a service, ordered by path then method
    async fn list_operations(&self, service_id: &Id) -> Result<Vec<Operation>>;
    /// Components of a service, ordered by reference
    async fn list_components(&self, service_id: &Id) -> Result<Vec<ComponentDefinition>>;
}

/// Registry of named remote sources
#[async_trait::async_trait]
pub trait SyncConfigStore: Send + Sync {
    async fn get_sync_config(&self, service_id: &Id, name: &str) -> Result<Option<SyncConfig>>;
    async fn list_sync_configs(&self, service_id: &Id) -> Result<Vec<SyncConfig>>;
    async fn list_all_sync_configs(&self) -> Result<Vec<SyncConfig>>;
    /// Create or replace a config by (service_id, name)
    async fn upsert_sync_config(&self, config: SyncConfig) -> Result<()>;
    async fn delete_sync_config(&self, service_id: &Id, name: &str) -> Result<bool>;
    /// Store the outcome of a sync run; false if the config no longer exists
    async fn record_sync_result(&self, result: &SyncResult) -> Result<bool>;
}

/// Writes made by one reconciliation. Nothing is visible to other readers
/// until `commit`; dropping the transaction without committing rolls it back.
#[async_trait::async_trait]
pub trait ReconcileTransaction: Send {
    async fn get_schema_document(&mut self, service_id: &Id) -> Result<Option<SchemaDocument>>;
    async fn save_schema_document(&mut self, document: &SchemaDocument) -> Result<()>;

    async fn list_components(&mut self, service_id: &Id) -> Result<Vec<ComponentDefinition>>;
    async fn insert_component(&mut self, component: &ComponentDefinition) -> Result<()>;
    async fn update_component(&mut self, component: &ComponentDefinition) -> Result<()>;
    async fn delete_components(&mut self, service_id: &Id, references: &[String]) -> Result<u64>;

    /// Non-deleted operations of a service
    async fn list_operations(&mut self, service_id: &Id) -> Result<Vec<Operation>>;
    async fn insert_operation(&mut self, operation: &Operation) -> Result<()>;
    async fn update_operation(&mut self, operation: &Operation) -> Result<()>;
    async fn soft_delete_operations(&mut self, service_id: &Id, ids: &[Id]) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReconcileTransaction>>;
}

pub trait Store: ServiceStore + SyncConfigStore + TransactionalStore + Send + Sync {}
