use std::sync::Arc;

use log::{error, info, warn};

use crate::error::ReconcileError;
use crate::logic::components::ComponentPlan;
use crate::logic::operations::OperationPlan;
use crate::logic::root_merge::merge_root;
use crate::logic::sinks::ChangeSink;
use crate::model::{Id, ParsedDocument, ReconcilePolicy, ReconcileReport};
use crate::store::schema_cache::{CachedSchema, SchemaCache};
use crate::store::traits::{ReconcileTransaction, Store};

/// Merges parsed documents into a service's persisted schema.
///
/// Root merge, component reconciliation and operation reconciliation run in
/// one transaction: either all of them commit or none do.
pub struct Reconciler<S: Store> {
    store: Arc<S>,
    cache: Arc<dyn SchemaCache>,
    sinks: Vec<Arc<dyn ChangeSink>>,
}

impl<S: Store> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            sinks: self.sinks.clone(),
        }
    }
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn SchemaCache>) -> Self {
        Self {
            store,
            cache,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reconcile `document` into the schema of `service_id` under `policy`
    pub async fn reconcile(
        &self,
        service_id: &Id,
        document: ParsedDocument,
        policy: &ReconcilePolicy,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut tx = self.store.begin().await?;

        match self.run(&mut *tx, service_id, document, policy).await {
            Ok(report) => {
                tx.commit().await?;
                self.cache.invalidate(service_id);
                for sink in &self.sinks {
                    if let Err(e) = sink.on_reconciled(&report).await {
                        warn!("Change sink failed for {}: {:#}", service_id, e);
                    }
                }
                info!(
                    "Reconciled {} ({} operation change(s), {} component change(s))",
                    service_id,
                    report.operations.len(),
                    report.components.len()
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    error!(
                        "Rollback for {} failed after {}: {:#}",
                        service_id, e, rollback_error
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        tx: &mut dyn ReconcileTransaction,
        service_id: &Id,
        document: ParsedDocument,
        policy: &ReconcilePolicy,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut schema = tx
            .get_schema_document(service_id)
            .await?
            .ok_or_else(|| ReconcileError::validation(format!("service not found: {service_id}")))?;

        // The gate runs before any write, so a rejected call leaves no trace
        let existing_operations = tx.list_operations(service_id).await?;
        let operation_plan = OperationPlan::build(
            service_id,
            existing_operations,
            &document.operations,
            policy,
        );
        operation_plan.ensure_permitted(policy)?;

        merge_root(&mut schema, document.root)?;
        tx.save_schema_document(&schema).await?;

        let existing_components = tx.list_components(service_id).await?;
        let components = ComponentPlan::build(
            service_id,
            existing_components,
            &document.components,
            policy.strategy,
            policy.delete_when_absent,
        )
        .apply(tx)
        .await?;

        let operations = operation_plan.apply(tx, policy).await?;

        Ok(ReconcileReport {
            service_id: service_id.clone(),
            operations: operations.change_set,
            components: components.change_set,
            touched_operations: operations.touched,
            touched_components: components.touched,
        })
    }

    /// Root document and components of a service, served from the cache when warm
    pub async fn load_schema(&self, service_id: &Id) -> anyhow::Result<Option<CachedSchema>> {
        if let Some(cached) = self.cache.get(service_id) {
            return Ok(Some(cached));
        }

        let Some(document) = self.store.get_schema_document(service_id).await? else {
            return Ok(None);
        };
        let components = self.store.list_components(service_id).await?;
        let schema = CachedSchema {
            document,
            components,
        };
        self.cache.put(service_id, schema.clone());
        Ok(Some(schema))
    }

    /// Drop any cached schema of a service
    pub fn invalidate(&self, service_id: &Id) {
        self.cache.invalidate(service_id);
    }
}
