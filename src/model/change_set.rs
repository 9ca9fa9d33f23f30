use serde::{Deserialize, Serialize};

use crate::model::{ComponentDefinition, Id, Operation, OperationKey};

/// Keys created, updated and deleted by one reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet<K> {
    pub created: Vec<K>,
    pub updated: Vec<K>,
    pub deleted: Vec<K>,
}

impl<K> ChangeSet<K> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

impl<K> Default for ChangeSet<K> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

/// Outcome of a reconciliation, handed to audit and notification collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub service_id: Id,
    pub operations: ChangeSet<OperationKey>,
    pub components: ChangeSet<String>,
    /// Operations as written (created, updated, soft-deleted)
    pub touched_operations: Vec<Operation>,
    /// Components as written (created, updated) or as they were before deletion
    pub touched_components: Vec<ComponentDefinition>,
}

impl ReconcileReport {
    pub fn new(service_id: Id) -> Self {
        Self {
            service_id,
            operations: ChangeSet::default(),
            components: ChangeSet::default(),
            touched_operations: Vec::new(),
            touched_components: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.components.is_empty()
    }
}
