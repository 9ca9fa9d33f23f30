use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    now_rfc3339, ComponentDefinition, Id, Operation, SchemaDocument, SyncConfig, SyncResult,
};
use crate::store::traits::{
    ReconcileTransaction, ServiceStore, Store, SyncConfigStore, TransactionalStore,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    documents: HashMap<Id, SchemaDocument>,
    /// Operations keyed by operation id, soft-deleted rows included
    operations: BTreeMap<Id, Operation>,
    components: BTreeMap<(Id, String), ComponentDefinition>,
    sync_configs: BTreeMap<(Id, String), SyncConfig>,
}

impl MemoryState {
    fn live_operations(&self, service_id: &Id) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self
            .operations
            .values()
            .filter(|op| &op.service_id == service_id && !op.deleted)
            .cloned()
            .collect();
        operations.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));
        operations
    }

    fn components_for(&self, service_id: &Id) -> Vec<ComponentDefinition> {
        self.components
            .values()
            .filter(|c| &c.service_id == service_id)
            .cloned()
            .collect()
    }
}

/// Store kept entirely in memory.
///
/// Transactions take the store lock for their whole lifetime and work on a
/// copy of the state, which replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next transaction commit fail, leaving the state untouched
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// All operations of a service including soft-deleted ones
    pub async fn list_operations_with_deleted(&self, service_id: &Id) -> Vec<Operation> {
        let state = self.state.lock().await;
        state
            .operations
            .values()
            .filter(|op| &op.service_id == service_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ServiceStore for MemoryStore {
    async fn create_service(&self, service_id: &Id) -> Result<SchemaDocument> {
        let mut state = self.state.lock().await;
        let document = state
            .documents
            .entry(service_id.clone())
            .or_insert_with(|| SchemaDocument::empty(service_id.clone()));
        Ok(document.clone())
    }

    async fn delete_service(&self, service_id: &Id) -> Result<bool> {
        let mut state = self.state.lock().await;
        let existed = state.documents.remove(service_id).is_some();
        state.operations.retain(|_, op| &op.service_id != service_id);
        state.components.retain(|(sid, _), _| sid != service_id);
        state.sync_configs.retain(|(sid, _), _| sid != service_id);
        Ok(existed)
    }

    async fn get_schema_document(&self, service_id: &Id) -> Result<Option<SchemaDocument>> {
        let state = self.state.lock().await;
        Ok(state.documents.get(service_id).cloned())
    }

    async fn list_operations(&self, service_id: &Id) -> Result<Vec<Operation>> {
        let state = self.state.lock().await;
        Ok(state.live_operations(service_id))
    }

    async fn list_components(&self, service_id: &Id) -> Result<Vec<ComponentDefinition>> {
        let state = self.state.lock().await;
        Ok(state.components_for(service_id))
    }
}

#[async_trait::async_trait]
impl SyncConfigStore for MemoryStore {
    async fn get_sync_config(&self, service_id: &Id, name: &str) -> Result<Option<SyncConfig>> {
        let state = self.state.lock().await;
        Ok(state
            .sync_configs
            .get(&(service_id.clone(), name.to_string()))
            .cloned())
    }

    async fn list_sync_configs(&self, service_id: &Id) -> Result<Vec<SyncConfig>> {
        let state = self.state.lock().await;
        Ok(state
            .sync_configs
            .values()
            .filter(|config| &config.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn list_all_sync_configs(&self) -> Result<Vec<SyncConfig>> {
        let state = self.state.lock().await;
        Ok(state.sync_configs.values().cloned().collect())
    }

    async fn upsert_sync_config(&self, config: SyncConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.documents.contains_key(&config.service_id) {
            bail!("Service not found: {}", config.service_id);
        }
        state
            .sync_configs
            .insert((config.service_id.clone(), config.name.clone()), config);
        Ok(())
    }

    async fn delete_sync_config(&self, service_id: &Id, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .sync_configs
            .remove(&(service_id.clone(), name.to_string()))
            .is_some())
    }

    async fn record_sync_result(&self, result: &SyncResult) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .sync_configs
            .get_mut(&(result.service_id.clone(), result.name.clone()))
        {
            Some(config) => {
                config.record(result);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ReconcileTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            working,
            fail_next_commit: self.fail_next_commit.clone(),
        }))
    }
}

impl Store for MemoryStore {}

struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_none() {
            bail!("Transaction already finished");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReconcileTransaction for MemoryTransaction {
    async fn get_schema_document(&mut self, service_id: &Id) -> Result<Option<SchemaDocument>> {
        self.ensure_open()?;
        Ok(self.working.documents.get(service_id).cloned())
    }

    async fn save_schema_document(&mut self, document: &SchemaDocument) -> Result<()> {
        self.ensure_open()?;
        if !self.working.documents.contains_key(&document.service_id) {
            bail!("Service not found: {}", document.service_id);
        }
        let mut document = document.clone();
        document.updated_at = now_rfc3339();
        self.working
            .documents
            .insert(document.service_id.clone(), document);
        Ok(())
    }

    async fn list_components(&mut self, service_id: &Id) -> Result<Vec<ComponentDefinition>> {
        self.ensure_open()?;
        Ok(self.working.components_for(service_id))
    }

    async fn insert_component(&mut self, component: &ComponentDefinition) -> Result<()> {
        self.ensure_open()?;
        let key = (component.service_id.clone(), component.reference.clone());
        if self.working.components.contains_key(&key) {
            bail!(
                "Duplicate component reference {} for service {}",
                component.reference,
                component.service_id
            );
        }
        self.working.components.insert(key, component.clone());
        Ok(())
    }

    async fn update_component(&mut self, component: &ComponentDefinition) -> Result<()> {
        self.ensure_open()?;
        let key = (component.service_id.clone(), component.reference.clone());
        let slot = self
            .working
            .components
            .get_mut(&key)
            .ok_or_else(|| anyhow!("Component not found: {}", component.reference))?;
        *slot = component.clone();
        Ok(())
    }

    async fn delete_components(&mut self, service_id: &Id, references: &[String]) -> Result<u64> {
        self.ensure_open()?;
        let mut removed = 0;
        for reference in references {
            if self
                .working
                .components
                .remove(&(service_id.clone(), reference.clone()))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn list_operations(&mut self, service_id: &Id) -> Result<Vec<Operation>> {
        self.ensure_open()?;
        Ok(self.working.live_operations(service_id))
    }

    async fn insert_operation(&mut self, operation: &Operation) -> Result<()> {
        self.ensure_open()?;
        // (service_id, method, path) is unique among live operations
        let clash = self.working.operations.values().any(|op| {
            !op.deleted
                && op.service_id == operation.service_id
                && op.method == operation.method
                && op.path == operation.path
        });
        if clash {
            bail!(
                "Duplicate operation {} {} for service {}",
                operation.method,
                operation.path,
                operation.service_id
            );
        }
        self.working
            .operations
            .insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn update_operation(&mut self, operation: &Operation) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .working
            .operations
            .get_mut(&operation.id)
            .ok_or_else(|| anyhow!("Operation not found: {}", operation.id))?;
        *slot = operation.clone();
        Ok(())
    }

    async fn soft_delete_operations(&mut self, service_id: &Id, ids: &[Id]) -> Result<u64> {
        self.ensure_open()?;
        let now = now_rfc3339();
        let mut deleted = 0;
        for id in ids {
            if let Some(op) = self.working.operations.get_mut(id) {
                if &op.service_id == service_id && !op.deleted {
                    op.deleted = true;
                    op.updated_at = now.clone();
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| anyhow!("Transaction already finished"))?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            bail!("Injected commit failure");
        }
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard.take();
        self.working = MemoryState::default();
        Ok(())
    }
}
