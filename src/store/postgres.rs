use anyhow::{anyhow, Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::model::{
    ApiSource, ApiStatus, ComponentDefinition, ComponentKind, HttpMethod, Id, Operation,
    OperationContent, SchemaDocument, Strategy, SyncConfig, SyncCredential, SyncResult,
};
use crate::store::traits::{
    ReconcileTransaction, ServiceStore, Store, SyncConfigStore, TransactionalStore,
};

const OPERATION_COLUMNS: &str = "id, service_id, method, path, content, fingerprint, status, source, sync_name, deleted, created_at, updated_at";
const COMPONENT_COLUMNS: &str =
    "id, service_id, reference, kind, name, model, fingerprint, created_at, updated_at";
const SYNC_CONFIG_COLUMNS: &str = "service_id, name, url, credentials, strategy, delete_when_absent, last_sync_at, last_sync_success, last_sync_cause, created_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }
}

fn document_from_row(row: &PgRow) -> Result<SchemaDocument> {
    let Json(document): Json<SchemaDocument> = row.try_get("document")?;
    Ok(document)
}

fn operation_from_row(row: &PgRow) -> Result<Operation> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    let source: String = row.try_get("source")?;
    let Json(content): Json<OperationContent> = row.try_get("content")?;

    Ok(Operation {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        method: HttpMethod::parse(&method)
            .ok_or_else(|| anyhow!("Unknown HTTP method in store: {}", method))?,
        path: row.try_get("path")?,
        content,
        fingerprint: row.try_get("fingerprint")?,
        status: ApiStatus::parse(&status),
        source: ApiSource::parse(&source),
        sync_name: row.try_get("sync_name")?,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn component_from_row(row: &PgRow) -> Result<ComponentDefinition> {
    let kind: String = row.try_get("kind")?;
    let Json(model): Json<serde_json::Value> = row.try_get("model")?;

    Ok(ComponentDefinition {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        reference: row.try_get("reference")?,
        kind: ComponentKind::parse(&kind)
            .ok_or_else(|| anyhow!("Unknown component kind in store: {}", kind))?,
        name: row.try_get("name")?,
        model,
        fingerprint: row.try_get("fingerprint")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn sync_config_from_row(row: &PgRow) -> Result<SyncConfig> {
    let strategy: String = row.try_get("strategy")?;
    let Json(credentials): Json<Vec<SyncCredential>> = row.try_get("credentials")?;

    Ok(SyncConfig {
        service_id: row.try_get("service_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        credentials,
        strategy: Strategy::parse(&strategy).unwrap_or_default(),
        delete_when_absent: row.try_get("delete_when_absent")?,
        last_sync_at: row.try_get("last_sync_at")?,
        last_sync_success: row.try_get("last_sync_success")?,
        last_sync_cause: row.try_get("last_sync_cause")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl ServiceStore for PostgresStore {
    async fn create_service(&self, service_id: &Id) -> Result<SchemaDocument> {
        let document = SchemaDocument::empty(service_id.clone());
        sqlx::query(
            r#"
            INSERT INTO schema_documents (service_id, document, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (service_id) DO NOTHING
            "#,
        )
        .bind(service_id)
        .bind(Json(&document))
        .bind(&document.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create service")?;

        self.get_schema_document(service_id)
            .await?
            .ok_or_else(|| anyhow!("Service {} vanished after creation", service_id))
    }

    async fn delete_service(&self, service_id: &Id) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for statement in [
            "DELETE FROM sync_configs WHERE service_id = $1",
            "DELETE FROM components WHERE service_id = $1",
            "DELETE FROM operations WHERE service_id = $1",
        ] {
            sqlx::query(statement)
                .bind(service_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete service data")?;
        }
        let result = sqlx::query("DELETE FROM schema_documents WHERE service_id = $1")
            .bind(service_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete schema document")?;

        tx.commit().await.context("Failed to commit service deletion")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_schema_document(&self, service_id: &Id) -> Result<Option<SchemaDocument>> {
        let row = sqlx::query("SELECT document FROM schema_documents WHERE service_id = $1")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch schema document")?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_operations(&self, service_id: &Id) -> Result<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE service_id = $1 AND NOT deleted ORDER BY path, method"
        ))
        .bind(service_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list operations")?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn list_components(&self, service_id: &Id) -> Result<Vec<ComponentDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE service_id = $1 ORDER BY reference"
        ))
        .bind(service_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list components")?;

        rows.iter().map(component_from_row).collect()
    }
}

#[async_trait::async_trait]
impl SyncConfigStore for PostgresStore {
    async fn get_sync_config(&self, service_id: &Id, name: &str) -> Result<Option<SyncConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {SYNC_CONFIG_COLUMNS} FROM sync_configs WHERE service_id = $1 AND name = $2"
        ))
        .bind(service_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch sync config")?;

        row.as_ref().map(sync_config_from_row).transpose()
    }

    async fn list_sync_configs(&self, service_id: &Id) -> Result<Vec<SyncConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {SYNC_CONFIG_COLUMNS} FROM sync_configs WHERE service_id = $1 ORDER BY name"
        ))
        .bind(service_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sync configs")?;

        rows.iter().map(sync_config_from_row).collect()
    }

    async fn list_all_sync_configs(&self) -> Result<Vec<SyncConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {SYNC_CONFIG_COLUMNS} FROM sync_configs ORDER BY service_id, name"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sync configs")?;

        rows.iter().map(sync_config_from_row).collect()
    }

    async fn upsert_sync_config(&self, config: SyncConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_configs (service_id, name, url, credentials, strategy, delete_when_absent,
                                      last_sync_at, last_sync_success, last_sync_cause, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (service_id, name) DO UPDATE SET
                url = EXCLUDED.url,
                credentials = EXCLUDED.credentials,
                strategy = EXCLUDED.strategy,
                delete_when_absent = EXCLUDED.delete_when_absent,
                last_sync_at = EXCLUDED.last_sync_at,
                last_sync_success = EXCLUDED.last_sync_success,
                last_sync_cause = EXCLUDED.last_sync_cause
            "#,
        )
        .bind(&config.service_id)
        .bind(&config.name)
        .bind(&config.url)
        .bind(Json(&config.credentials))
        .bind(config.strategy.as_str())
        .bind(config.delete_when_absent)
        .bind(config.last_sync_at)
        .bind(config.last_sync_success)
        .bind(&config.last_sync_cause)
        .bind(&config.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert sync config")?;

        Ok(())
    }

    async fn delete_sync_config(&self, service_id: &Id, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_configs WHERE service_id = $1 AND name = $2")
            .bind(service_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete sync config")?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_sync_result(&self, result: &SyncResult) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE sync_configs
            SET last_sync_at = $3, last_sync_success = $4, last_sync_cause = $5
            WHERE service_id = $1 AND name = $2
            "#,
        )
        .bind(&result.service_id)
        .bind(&result.name)
        .bind(result.synced_at)
        .bind(result.success)
        .bind(&result.failure_cause)
        .execute(&self.pool)
        .await
        .context("Failed to record sync result")?;

        Ok(outcome.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl TransactionalStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn ReconcileTransaction>> {
        let tx = self.pool.begin().await.context("Failed to begin transaction")?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }
}

impl Store for PostgresStore {}

/// Reconciliation writes on one pooled connection; dropped uncommitted, sqlx rolls back
pub struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| anyhow!("Transaction already finished"))
    }
}

#[async_trait::async_trait]
impl ReconcileTransaction for PostgresTransaction {
    async fn get_schema_document(&mut self, service_id: &Id) -> Result<Option<SchemaDocument>> {
        // Lock the document row so concurrent reconciliations of one service queue up
        let row = sqlx::query(
            "SELECT document FROM schema_documents WHERE service_id = $1 FOR UPDATE",
        )
        .bind(service_id)
        .fetch_optional(self.conn()?)
        .await
        .context("Failed to fetch schema document")?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn save_schema_document(&mut self, document: &SchemaDocument) -> Result<()> {
        let mut document = document.clone();
        document.updated_at = crate::model::now_rfc3339();
        let result = sqlx::query(
            "UPDATE schema_documents SET document = $2, updated_at = $3 WHERE service_id = $1",
        )
        .bind(&document.service_id)
        .bind(Json(&document))
        .bind(&document.updated_at)
        .execute(self.conn()?)
        .await
        .context("Failed to save schema document")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Service not found: {}", document.service_id));
        }
        Ok(())
    }

    async fn list_components(&mut self, service_id: &Id) -> Result<Vec<ComponentDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE service_id = $1 ORDER BY reference"
        ))
        .bind(service_id)
        .fetch_all(self.conn()?)
        .await
        .context("Failed to list components")?;

        rows.iter().map(component_from_row).collect()
    }

    async fn insert_component(&mut self, component: &ComponentDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO components (id, service_id, reference, kind, name, model, fingerprint, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&component.id)
        .bind(&component.service_id)
        .bind(&component.reference)
        .bind(component.kind.as_str())
        .bind(&component.name)
        .bind(Json(&component.model))
        .bind(component.fingerprint)
        .bind(&component.created_at)
        .bind(&component.updated_at)
        .execute(self.conn()?)
        .await
        .with_context(|| format!("Failed to insert component {}", component.reference))?;

        Ok(())
    }

    async fn update_component(&mut self, component: &ComponentDefinition) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE components SET model = $3, fingerprint = $4, updated_at = $5
            WHERE service_id = $1 AND reference = $2
            "#,
        )
        .bind(&component.service_id)
        .bind(&component.reference)
        .bind(Json(&component.model))
        .bind(component.fingerprint)
        .bind(&component.updated_at)
        .execute(self.conn()?)
        .await
        .with_context(|| format!("Failed to update component {}", component.reference))?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Component not found: {}", component.reference));
        }
        Ok(())
    }

    async fn delete_components(&mut self, service_id: &Id, references: &[String]) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM components WHERE service_id = $1 AND reference = ANY($2)")
                .bind(service_id)
                .bind(references)
                .execute(self.conn()?)
                .await
                .context("Failed to delete components")?;

        Ok(result.rows_affected())
    }

    async fn list_operations(&mut self, service_id: &Id) -> Result<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE service_id = $1 AND NOT deleted ORDER BY path, method"
        ))
        .bind(service_id)
        .fetch_all(self.conn()?)
        .await
        .context("Failed to list operations")?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn insert_operation(&mut self, operation: &Operation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (id, service_id, method, path, content, fingerprint, status, source,
                                    sync_name, deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.service_id)
        .bind(operation.method.as_str())
        .bind(&operation.path)
        .bind(Json(&operation.content))
        .bind(operation.fingerprint)
        .bind(operation.status.as_str())
        .bind(operation.source.as_str())
        .bind(&operation.sync_name)
        .bind(operation.deleted)
        .bind(&operation.created_at)
        .bind(&operation.updated_at)
        .execute(self.conn()?)
        .await
        .with_context(|| format!("Failed to insert operation {}", operation.key()))?;

        Ok(())
    }

    async fn update_operation(&mut self, operation: &Operation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET content = $2, fingerprint = $3, status = $4, source = $5, sync_name = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(&operation.id)
        .bind(Json(&operation.content))
        .bind(operation.fingerprint)
        .bind(operation.status.as_str())
        .bind(operation.source.as_str())
        .bind(&operation.sync_name)
        .bind(&operation.updated_at)
        .execute(self.conn()?)
        .await
        .with_context(|| format!("Failed to update operation {}", operation.key()))?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Operation not found: {}", operation.id));
        }
        Ok(())
    }

    async fn soft_delete_operations(&mut self, service_id: &Id, ids: &[Id]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE operations SET deleted = TRUE, updated_at = $3
            WHERE service_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(service_id)
        .bind(ids)
        .bind(crate::model::now_rfc3339())
        .execute(self.conn()?)
        .await
        .context("Failed to soft-delete operations")?;

        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("Transaction already finished"))?;
        tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.context("Failed to roll back transaction"),
            None => Ok(()),
        }
    }
}
