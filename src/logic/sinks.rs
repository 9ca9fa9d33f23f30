use anyhow::Result;
use log::info;

use crate::model::ReconcileReport;

/// Receives the outcome of every committed reconciliation.
/// A failing sink is logged; it never undoes the commit.
#[async_trait::async_trait]
pub trait ChangeSink: Send + Sync {
    async fn on_reconciled(&self, report: &ReconcileReport) -> Result<()>;
}

/// Writes a one-line summary of each committed change set to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChangeSink;

#[async_trait::async_trait]
impl ChangeSink for LogChangeSink {
    async fn on_reconciled(&self, report: &ReconcileReport) -> Result<()> {
        if report.is_empty() {
            return Ok(());
        }
        info!(
            "Service {} reconciled: operations +{} ~{} -{}, components +{} ~{} -{}",
            report.service_id,
            report.operations.created.len(),
            report.operations.updated.len(),
            report.operations.deleted.len(),
            report.components.created.len(),
            report.components.updated.len(),
            report.components.deleted.len()
        );
        Ok(())
    }
}
