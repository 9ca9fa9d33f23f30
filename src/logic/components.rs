use std::collections::BTreeMap;

use log::debug;

use crate::error::ReconcileError;
use crate::logic::classify::{classify, Classification};
use crate::logic::fingerprint::fingerprint_component;
use crate::model::{ChangeSet, ComponentContent, ComponentDefinition, Id, Strategy};
use crate::store::traits::ReconcileTransaction;

/// Changes applied to a service's components, with the rows written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentChanges {
    pub change_set: ChangeSet<String>,
    pub touched: Vec<ComponentDefinition>,
}

/// Planned create/update/delete of component definitions for one service
#[derive(Debug, Clone)]
pub struct ComponentPlan {
    service_id: Id,
    classification: Classification<String>,
    existing: BTreeMap<String, ComponentDefinition>,
    incoming: BTreeMap<String, (ComponentContent, i64)>,
}

impl ComponentPlan {
    /// Classify `incoming` against the persisted components of a service.
    ///
    /// Components carry no source tag, so with `delete_when_absent` every
    /// persisted component missing from `incoming` is deleted, whichever
    /// sync source or editor contributed it. Only operation deletion is
    /// bounded by the policy's source scope.
    pub fn build(
        service_id: &Id,
        existing: Vec<ComponentDefinition>,
        incoming: &BTreeMap<String, ComponentContent>,
        strategy: Strategy,
        delete_when_absent: bool,
    ) -> Self {
        let existing: BTreeMap<String, ComponentDefinition> = existing
            .into_iter()
            .map(|component| (component.reference.clone(), component))
            .collect();
        let incoming: BTreeMap<String, (ComponentContent, i64)> = incoming
            .iter()
            .map(|(reference, content)| {
                (
                    reference.clone(),
                    (content.clone(), fingerprint_component(content)),
                )
            })
            .collect();

        let existing_fingerprints = existing
            .iter()
            .map(|(reference, component)| (reference.clone(), component.fingerprint))
            .collect();
        let incoming_fingerprints = incoming
            .iter()
            .map(|(reference, (_, fingerprint))| (reference.clone(), *fingerprint))
            .collect();

        let classification = classify(
            &existing_fingerprints,
            &incoming_fingerprints,
            strategy,
            delete_when_absent,
            // unscoped: any absent component is deletable
            |_| true,
        );

        Self {
            service_id: service_id.clone(),
            classification,
            existing,
            incoming,
        }
    }

    pub fn classification(&self) -> &Classification<String> {
        &self.classification
    }

    /// Apply creates, then updates, then deletes
    pub async fn apply(
        mut self,
        tx: &mut dyn ReconcileTransaction,
    ) -> Result<ComponentChanges, ReconcileError> {
        let mut touched = Vec::new();

        for reference in &self.classification.to_create {
            let Some((content, fingerprint)) = self.incoming.remove(reference) else {
                continue;
            };
            let component = ComponentDefinition::new(self.service_id.clone(), content, fingerprint);
            tx.insert_component(&component).await?;
            touched.push(component);
        }

        for reference in &self.classification.to_update {
            let (Some((content, fingerprint)), Some(mut component)) = (
                self.incoming.remove(reference),
                self.existing.remove(reference),
            ) else {
                continue;
            };
            component.replace_content(content, fingerprint);
            tx.update_component(&component).await?;
            touched.push(component);
        }

        if !self.classification.to_delete.is_empty() {
            tx.delete_components(&self.service_id, &self.classification.to_delete)
                .await?;
            for reference in &self.classification.to_delete {
                if let Some(component) = self.existing.remove(reference) {
                    touched.push(component);
                }
            }
        }

        debug!(
            "Components of {}: {} created, {} updated, {} deleted",
            self.service_id,
            self.classification.to_create.len(),
            self.classification.to_update.len(),
            self.classification.to_delete.len()
        );

        let Classification {
            to_create,
            to_update,
            to_delete,
            ..
        } = self.classification;

        Ok(ComponentChanges {
            change_set: ChangeSet {
                created: to_create,
                updated: to_update,
                deleted: to_delete,
            },
            touched,
        })
    }
}

/// Merge incoming component definitions into the persisted set of one service
pub async fn reconcile_components(
    tx: &mut dyn ReconcileTransaction,
    service_id: &Id,
    incoming: &BTreeMap<String, ComponentContent>,
    strategy: Strategy,
    delete_when_absent: bool,
) -> Result<ComponentChanges, ReconcileError> {
    let existing = tx.list_components(service_id).await?;
    ComponentPlan::build(service_id, existing, incoming, strategy, delete_when_absent)
        .apply(tx)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentKind;
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{ServiceStore, TransactionalStore};
    use serde_json::json;

    fn schema(name: &str, model: serde_json::Value) -> (String, ComponentContent) {
        let content = ComponentContent::new(ComponentKind::Schemas, name, model);
        (content.reference(), content)
    }

    async fn seeded_store(service_id: &Id) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_service(service_id).await.unwrap();

        let incoming: BTreeMap<_, _> = [
            schema("Pet", json!({"type": "object"})),
            schema("Error", json!({"type": "string"})),
        ]
        .into_iter()
        .collect();

        let mut tx = store.begin().await.unwrap();
        reconcile_components(&mut *tx, service_id, &incoming, Strategy::Cover, false)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_cover_updates_changed_models() {
        let service_id = "svc".to_string();
        let store = seeded_store(&service_id).await;

        let incoming: BTreeMap<_, _> = [
            schema("Pet", json!({"type": "object", "required": ["id"]})),
            schema("Error", json!({"type": "string"})),
            schema("Owner", json!({"type": "object"})),
        ]
        .into_iter()
        .collect();

        let mut tx = store.begin().await.unwrap();
        let changes = reconcile_components(&mut *tx, &service_id, &incoming, Strategy::Cover, false)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        assert_eq!(changes.change_set.created, vec!["#/components/schemas/Owner".to_string()]);
        assert_eq!(changes.change_set.updated, vec!["#/components/schemas/Pet".to_string()]);
        assert!(changes.change_set.deleted.is_empty());
        assert_eq!(changes.touched.len(), 2);

        let components = store.list_components(&service_id).await.unwrap();
        let pet = components
            .iter()
            .find(|c| c.name == "Pet")
            .unwrap();
        assert_eq!(pet.model, json!({"type": "object", "required": ["id"]}));
    }

    #[tokio::test]
    async fn test_ignore_keeps_existing_models() {
        let service_id = "svc".to_string();
        let store = seeded_store(&service_id).await;

        let incoming: BTreeMap<_, _> = [schema("Pet", json!({"type": "array"}))]
            .into_iter()
            .collect();

        let mut tx = store.begin().await.unwrap();
        let changes = reconcile_components(&mut *tx, &service_id, &incoming, Strategy::Ignore, false)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        assert!(changes.change_set.is_empty());
        let components = store.list_components(&service_id).await.unwrap();
        assert!(components.iter().all(|c| c.model != json!({"type": "array"})));
    }

    #[tokio::test]
    async fn test_delete_when_absent_removes_physically() {
        let service_id = "svc".to_string();
        let store = seeded_store(&service_id).await;

        let incoming: BTreeMap<_, _> = [schema("Pet", json!({"type": "object"}))]
            .into_iter()
            .collect();

        let mut tx = store.begin().await.unwrap();
        let changes = reconcile_components(&mut *tx, &service_id, &incoming, Strategy::Cover, true)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        assert_eq!(changes.change_set.deleted, vec!["#/components/schemas/Error".to_string()]);
        let components = store.list_components(&service_id).await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "Pet");
    }

    #[tokio::test]
    async fn test_other_services_are_untouched() {
        let service_id = "svc".to_string();
        let store = seeded_store(&service_id).await;
        let other = "other".to_string();
        store.create_service(&other).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let changes =
            reconcile_components(&mut *tx, &other, &BTreeMap::new(), Strategy::Cover, true)
                .await
                .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        assert!(changes.change_set.is_empty());
        assert_eq!(store.list_components(&service_id).await.unwrap().len(), 2);
    }
}
