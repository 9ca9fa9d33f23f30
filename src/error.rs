use serde::Serialize;
use thiserror::Error;

use crate::model::{ChangeSet, Id, OperationKey};

/// Errors raised by a reconciliation invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Destructive changes were detected and the caller did not force them.
    #[error(
        "this will update {} and delete {} operation(s); retry with forced=true to confirm",
        updated_count(.pending),
        deleted_count(.pending)
    )]
    ChangeConfirmationRequired { pending: ChangeSet<OperationKey> },

    /// Released operations would change without modify-authorization.
    #[error("released operation(s) cannot be changed without authorization: {}", join_keys(.keys))]
    ReleasedOperationLocked { keys: Vec<OperationKey> },

    /// Unparseable content, unsupported document or unknown target.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network, auth or timeout failure while fetching a remote document.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(String),

    /// Any storage failure; the surrounding transaction is rolled back.
    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl ReconcileError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote_fetch(message: impl Into<String>) -> Self {
        Self::RemoteFetch(message.into())
    }
}

fn updated_count(pending: &ChangeSet<OperationKey>) -> usize {
    pending.updated.len()
}

fn deleted_count(pending: &ChangeSet<OperationKey>) -> usize {
    pending.deleted.len()
}

fn join_keys(keys: &[OperationKey]) -> String {
    keys.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A sync config that failed during a bulk run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSync {
    pub service_id: Id,
    pub name: String,
    pub cause: String,
}

/// Errors surfaced by the sync registry.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No config with this name is registered for the service.
    #[error("sync config not found: {service_id}/{name}")]
    NotFound { service_id: Id, name: String },

    /// Every config was attempted; at least one failed.
    #[error(
        "{} of {attempted} sync config(s) failed: {}",
        failed_count(.failed),
        describe_failures(.failed)
    )]
    PartialFailure {
        attempted: usize,
        failed: Vec<FailedSync>,
    },

    /// Reading or writing the registry failed.
    #[error("sync registry failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

fn failed_count(failed: &[FailedSync]) -> usize {
    failed.len()
}

fn describe_failures(failed: &[FailedSync]) -> String {
    failed
        .iter()
        .map(|f| format!("{}/{} ({})", f.service_id, f.name, f.cause))
        .collect::<Vec<_>>()
        .join("; ")
}
