use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::ReconcileError;
use crate::logic::classify::{classify, Classification};
use crate::logic::fingerprint::{fingerprint_hex, fingerprint_operation};
use crate::model::{
    now_rfc3339, ChangeSet, Id, Operation, OperationContent, OperationKey, ReconcilePolicy,
};
use crate::store::traits::ReconcileTransaction;

/// Changes applied to a service's operations, with the rows written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationChanges {
    pub change_set: ChangeSet<OperationKey>,
    pub touched: Vec<Operation>,
}

/// Planned create/update/delete of operations for one service.
///
/// Building a plan has no side effects, so it can be checked against the
/// release lock and the confirmation gate before anything is written.
#[derive(Debug, Clone)]
pub struct OperationPlan {
    service_id: Id,
    classification: Classification<OperationKey>,
    existing: BTreeMap<OperationKey, Operation>,
    incoming: BTreeMap<OperationKey, (OperationContent, i64)>,
}

impl OperationPlan {
    pub fn build(
        service_id: &Id,
        existing: Vec<Operation>,
        incoming: &BTreeMap<OperationKey, OperationContent>,
        policy: &ReconcilePolicy,
    ) -> Self {
        let existing: BTreeMap<OperationKey, Operation> = existing
            .into_iter()
            .filter(|operation| !operation.deleted)
            .map(|operation| (operation.key(), operation))
            .collect();
        let incoming: BTreeMap<OperationKey, (OperationContent, i64)> = incoming
            .iter()
            .map(|(key, content)| {
                (
                    key.clone(),
                    (content.clone(), fingerprint_operation(key, content)),
                )
            })
            .collect();

        let existing_fingerprints = existing
            .iter()
            .map(|(key, operation)| (key.clone(), operation.fingerprint))
            .collect();
        let incoming_fingerprints = incoming
            .iter()
            .map(|(key, (_, fingerprint))| (key.clone(), *fingerprint))
            .collect();

        // Only operations owned by the same source may be removed
        let classification = classify(
            &existing_fingerprints,
            &incoming_fingerprints,
            policy.strategy,
            policy.delete_when_absent,
            |key| {
                existing
                    .get(key)
                    .is_some_and(|operation| operation.sync_name == policy.source_scope)
            },
        );

        Self {
            service_id: service_id.clone(),
            classification,
            existing,
            incoming,
        }
    }

    pub fn classification(&self) -> &Classification<OperationKey> {
        &self.classification
    }

    /// Updates and deletions this plan would apply
    pub fn pending(&self) -> ChangeSet<OperationKey> {
        ChangeSet {
            created: Vec::new(),
            updated: self.classification.to_update.clone(),
            deleted: self.classification.to_delete.clone(),
        }
    }

    /// Released operations this plan would update or delete
    pub fn released_targets(&self) -> Vec<OperationKey> {
        self.classification
            .to_update
            .iter()
            .chain(self.classification.to_delete.iter())
            .filter(|key| {
                self.existing
                    .get(*key)
                    .is_some_and(|operation| operation.is_released())
            })
            .cloned()
            .collect()
    }

    /// Reject the plan before any write when the caller may not apply it
    pub fn ensure_permitted(&self, policy: &ReconcilePolicy) -> Result<(), ReconcileError> {
        if !policy.allow_released_changes {
            let locked = self.released_targets();
            if !locked.is_empty() {
                warn!(
                    "Refusing to change {} released operation(s) of {}",
                    locked.len(),
                    self.service_id
                );
                return Err(ReconcileError::ReleasedOperationLocked { keys: locked });
            }
        }

        let pending = self.pending();
        if !policy.forced && !pending.is_empty() {
            info!(
                "Reconciliation of {} needs confirmation: {} update(s), {} deletion(s)",
                self.service_id,
                pending.updated.len(),
                pending.deleted.len()
            );
            return Err(ReconcileError::ChangeConfirmationRequired { pending });
        }

        Ok(())
    }

    /// Apply creates, then updates, then soft deletes
    pub async fn apply(
        mut self,
        tx: &mut dyn ReconcileTransaction,
        policy: &ReconcilePolicy,
    ) -> Result<OperationChanges, ReconcileError> {
        let mut touched = Vec::new();

        for key in &self.classification.to_create {
            let Some((content, fingerprint)) = self.incoming.remove(key) else {
                continue;
            };
            let operation = Operation::new(
                self.service_id.clone(),
                key.clone(),
                content,
                fingerprint,
                policy.api_source,
                policy.source_scope.clone(),
            );
            debug!("Creating {} ({})", key, fingerprint_hex(fingerprint));
            tx.insert_operation(&operation).await?;
            touched.push(operation);
        }

        for key in &self.classification.to_update {
            let (Some((content, fingerprint)), Some(mut operation)) =
                (self.incoming.remove(key), self.existing.remove(key))
            else {
                continue;
            };
            debug!(
                "Updating {} ({} -> {})",
                key,
                fingerprint_hex(operation.fingerprint),
                fingerprint_hex(fingerprint)
            );
            operation.content = content;
            operation.fingerprint = fingerprint;
            operation.source = policy.api_source;
            operation.sync_name = policy.source_scope.clone();
            operation.updated_at = now_rfc3339();
            tx.update_operation(&operation).await?;
            touched.push(operation);
        }

        if !self.classification.to_delete.is_empty() {
            let mut removed: Vec<Operation> = self
                .classification
                .to_delete
                .iter()
                .filter_map(|key| self.existing.remove(key))
                .collect();
            let ids: Vec<Id> = removed.iter().map(|operation| operation.id.clone()).collect();
            tx.soft_delete_operations(&self.service_id, &ids).await?;
            for operation in &mut removed {
                debug!("Deleting {}", operation.key());
                operation.deleted = true;
            }
            touched.extend(removed);
        }

        let Classification {
            to_create,
            to_update,
            to_delete,
            ..
        } = self.classification;

        Ok(OperationChanges {
            change_set: ChangeSet {
                created: to_create,
                updated: to_update,
                deleted: to_delete,
            },
            touched,
        })
    }
}

/// Diff incoming operations against the persisted ones and apply the result
/// if the policy permits it
pub async fn reconcile_operations(
    tx: &mut dyn ReconcileTransaction,
    service_id: &Id,
    incoming: &BTreeMap<OperationKey, OperationContent>,
    policy: &ReconcilePolicy,
) -> Result<OperationChanges, ReconcileError> {
    let existing = tx.list_operations(service_id).await?;
    let plan = OperationPlan::build(service_id, existing, incoming, policy);
    plan.ensure_permitted(policy)?;
    plan.apply(tx, policy).await
}
