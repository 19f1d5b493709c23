//! Core data models shared by the resolver, reconciler, and orchestrator.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::UploadError;

/// A catalog row as returned by the catalog: column name → JSON value.
pub type Row = Map<String, Value>;

/// Name of the key column every accession record carries.
pub const ID_COLUMN: &str = "ID";

/// Target table of a catalog update, e.g. `Zebrafish:Behavior`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub schema: String,
    pub table: String,
}

impl CatalogTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.schema, self.table)
    }
}

/// One catalog row identified as the accession a file belongs to.
///
/// Only constructed from rows that carry an `ID` field.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessionRecord {
    row: Row,
}

impl AccessionRecord {
    pub fn from_row(file_name: &str, row: Row) -> Result<Self, UploadError> {
        match row.get(ID_COLUMN) {
            None | Some(Value::Null) => Err(UploadError::MalformedRecord {
                file_name: file_name.to_string(),
                detail: format!("row has no {} value", ID_COLUMN),
            }),
            Some(_) => Ok(Self { row }),
        }
    }

    pub fn id(&self) -> &Value {
        // Presence is checked in `from_row`.
        self.row.get(ID_COLUMN).unwrap_or(&Value::Null)
    }

    /// The ID rendered for humans: strings without quotes, anything else as JSON.
    pub fn id_display(&self) -> String {
        display_value(self.id())
    }

    /// Raw value of a column; a missing column reads as `null`.
    pub fn value(&self, column: &str) -> &Value {
        self.row.get(column).unwrap_or(&Value::Null)
    }

    /// A column's value as text, `None` when absent, null, or empty.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.value(column) {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            other => Some(display_value(other)),
        }
    }

    pub fn row(&self) -> &Row {
        &self.row
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Partial records over the same column set: the values the catalog is
/// expected to hold now, and the values to write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTransition {
    pub table: CatalogTable,
    pub original: Row,
    pub update: Row,
}

impl UpdateTransition {
    /// Applying a transition whose two sides are equal changes nothing.
    pub fn is_noop(&self) -> bool {
        self.original == self.update
    }
}

/// What happened to the catalog binding of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The tracking column was null and now holds the new URL.
    Written,
    /// The tracking column already held the new URL.
    Unchanged,
    /// The asset type has no tracking column.
    Untracked,
}

/// Final state of one candidate file.
#[derive(Debug)]
pub enum Outcome {
    Uploaded {
        url: String,
        reconciliation: Reconciliation,
    },
    /// No rule matched the file name.
    Skipped,
    Failed(UploadError),
}

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub outcome: Outcome,
}

/// A lookup that returned more than one catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousLookup {
    pub query: String,
    pub rows: usize,
}

/// Everything one batch run produced.
#[derive(Debug)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<FileOutcome>,
    pub ambiguous: Vec<AmbiguousLookup>,
}

impl BatchReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Uploaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_)))
            .count()
    }

    /// Number of files whose upload produced a catalog write.
    pub fn catalog_writes(&self) -> usize {
        self.count_reconciled(Reconciliation::Written)
    }

    pub fn unchanged(&self) -> usize {
        self.count_reconciled(Reconciliation::Unchanged)
    }

    fn count_reconciled(&self, wanted: Reconciliation) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.outcome,
                    Outcome::Uploaded { reconciliation, .. } if reconciliation == wanted
                )
            })
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &UploadError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(e) => Some((&o.path, e)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn record_requires_id() {
        let err = AccessionRecord::from_row("a.m4v", row(json!({"Subject": "S1"}))).unwrap_err();
        assert_eq!(err.kind(), "malformed_record");

        let err = AccessionRecord::from_row("a.m4v", row(json!({"ID": null}))).unwrap_err();
        assert_eq!(err.kind(), "malformed_record");
    }

    #[test]
    fn text_treats_missing_null_and_empty_alike() {
        let rec = AccessionRecord::from_row(
            "a.m4v",
            row(json!({"ID": 7, "URL": "", "Raw URL": null, "Subject": "S1"})),
        )
        .unwrap();
        assert_eq!(rec.text("URL"), None);
        assert_eq!(rec.text("Raw URL"), None);
        assert_eq!(rec.text("Missing"), None);
        assert_eq!(rec.text("Subject").as_deref(), Some("S1"));
        assert_eq!(rec.id_display(), "7");
    }

    #[test]
    fn transition_noop_compares_both_sides() {
        let t = UpdateTransition {
            table: CatalogTable::new("Zebrafish", "Behavior"),
            original: row(json!({"ID": "Bhv001", "Raw URL": "/u"})),
            update: row(json!({"ID": "Bhv001", "Raw URL": "/u"})),
        };
        assert!(t.is_noop());
        assert_eq!(t.table.to_string(), "Zebrafish:Behavior");
    }
}
