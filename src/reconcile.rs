//! Catalog reconciliation.
//!
//! An accession may be bound to at most one uploaded URL, ever. Given the
//! record as read and the URL the upload produced, [`plan`] decides:
//!
//! | tracked value | result |
//! |---|---|
//! | null, missing, or empty | [`ReconcilePlan::Write`] null → new URL |
//! | equal to the new URL | [`ReconcilePlan::Unchanged`], no write |
//! | anything else | [`UploadError::AccessionConflict`], no write |
//! | rule has no tracking column | [`ReconcilePlan::Untracked`], no write |
//!
//! Only a `Write` transition reaches [`apply`], which sends it as a guarded
//! update keyed by `ID` and the original tracked value. A record mutated
//! between read and write no longer matches and surfaces as a conflict.

use serde_json::Value;

use crate::catalog::{CatalogClient, UpdateStatus};
use crate::error::UploadError;
use crate::mapping::AssetMapping;
use crate::models::{
    display_value, AccessionRecord, Reconciliation, Row, UpdateTransition, ID_COLUMN,
};

/// Outcome of planning; every variant carries the computed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilePlan {
    /// The tracking column is empty and must be set.
    Write(UpdateTransition),
    /// Already bound to this URL; `original == update`.
    Unchanged(UpdateTransition),
    /// Write-once asset type; `original == update == {ID}`.
    Untracked(UpdateTransition),
}

impl ReconcilePlan {
    pub fn transition(&self) -> &UpdateTransition {
        match self {
            ReconcilePlan::Write(t) | ReconcilePlan::Unchanged(t) | ReconcilePlan::Untracked(t) => t,
        }
    }

    pub fn reconciliation(&self) -> Reconciliation {
        match self {
            ReconcilePlan::Write(_) => Reconciliation::Written,
            ReconcilePlan::Unchanged(_) => Reconciliation::Unchanged,
            ReconcilePlan::Untracked(_) => Reconciliation::Untracked,
        }
    }
}

/// Compute the minimal update binding `record` to `new_url`.
pub fn plan(
    record: &AccessionRecord,
    new_url: &str,
    rule: &AssetMapping,
) -> Result<ReconcilePlan, UploadError> {
    let mut original = Row::new();
    original.insert(ID_COLUMN.to_string(), record.id().clone());
    let mut update = original.clone();

    let table = rule.table().clone();
    let Some(column) = rule.url_tracking_column() else {
        return Ok(ReconcilePlan::Untracked(UpdateTransition {
            table,
            original,
            update,
        }));
    };

    let existing = record.value(column);
    original.insert(column.to_string(), existing.clone());
    update.insert(column.to_string(), Value::String(new_url.to_string()));
    let transition = UpdateTransition {
        table,
        original,
        update,
    };

    match existing {
        Value::Null => Ok(ReconcilePlan::Write(transition)),
        Value::String(s) if s.is_empty() => Ok(ReconcilePlan::Write(transition)),
        Value::String(s) if s == new_url => Ok(ReconcilePlan::Unchanged(transition)),
        other => Err(UploadError::AccessionConflict {
            id: record.id_display(),
            column: column.to_string(),
            existing: display_value(other),
            new_url: new_url.to_string(),
        }),
    }
}

/// Send a planned write to the catalog.
///
/// A transition whose sides are equal is not sent. A catalog answer of
/// "no row matched" means the record changed after it was read and is
/// reported as [`UploadError::AccessionConflict`].
pub async fn apply(
    catalog: &dyn CatalogClient,
    transition: &UpdateTransition,
) -> Result<Reconciliation, UploadError> {
    if transition.is_noop() {
        return Ok(Reconciliation::Unchanged);
    }
    match catalog
        .update(&transition.table, &transition.original, &transition.update)
        .await?
    {
        UpdateStatus::Applied => Ok(Reconciliation::Written),
        UpdateStatus::Conflict => Err(concurrent_conflict(transition)),
    }
}

fn concurrent_conflict(transition: &UpdateTransition) -> UploadError {
    let id = transition
        .original
        .get(ID_COLUMN)
        .map(display_value)
        .unwrap_or_default();
    // The tracked column is the single non-ID key.
    let (column, new_url) = transition
        .update
        .iter()
        .find(|(k, _)| k.as_str() != ID_COLUMN)
        .map(|(k, v)| (k.clone(), display_value(v)))
        .unwrap_or_default();
    UploadError::AccessionConflict {
        id,
        column,
        existing: "<changed in catalog since it was read>".to_string(),
        new_url,
    }
}

/// Plan, then apply only when the plan is a write.
pub async fn reconcile(
    catalog: &dyn CatalogClient,
    record: &AccessionRecord,
    new_url: &str,
    rule: &AssetMapping,
) -> Result<Reconciliation, UploadError> {
    match plan(record, new_url, rule)? {
        ReconcilePlan::Write(transition) => apply(catalog, &transition).await,
        other => Ok(other.reconciliation()),
    }
}
