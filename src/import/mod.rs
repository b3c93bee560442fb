//! Destructive restore of a snapshot into the live store.
//!
//! Both restore paths share the same building blocks: wipe in reverse level
//! order, filter the protected administrator rows, strip circular foreign keys,
//! insert in forward level order, then replay the stripped values and verify
//! row counts. Failures below the top level are folded into [`ImportOutcome`]
//! rather than returned as errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;

use crate::progress::{Operation, ProgressTracker, ProgressUpdate};
use crate::store::StoreError;
use crate::AppError;

pub mod bulk;
pub mod finalize;
pub mod incremental;
pub mod insert;
pub mod jobs;
pub mod protect;
pub mod report;
pub mod sanitize;
pub mod validator;

pub use bulk::import_bulk;
pub use incremental::{
    import_finalize, import_init, import_table, FinalizeRequest, FinalizeResponse, InitRequest,
    InitResponse, TableRequest, TableResponse,
};
pub use jobs::{JobStore, RestoreJob};
pub use report::write_import_report;
pub use validator::{validate, validate_meta, ValidationReport, ValidationTier};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub reset_delay: Duration,
    /// Acting administrator whose identity rows survive the wipe.
    pub protected_id: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            reset_delay: Duration::from_secs(5),
            protected_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum TableStatus {
    Ok,
    Partial,
    Error,
}

impl TableStatus {
    pub fn classify(expected: u64, inserted: u64) -> Self {
        if inserted >= expected {
            TableStatus::Ok
        } else if inserted > 0 {
            TableStatus::Partial
        } else {
            TableStatus::Error
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TableOutcome {
    pub table: String,
    #[ts(type = "number")]
    pub expected: u64,
    #[ts(type = "number")]
    pub inserted: u64,
    pub status: TableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DeleteOutcome {
    pub table: String,
    #[ts(type = "number")]
    pub deleted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct VerificationEntry {
    pub table: String,
    #[ts(type = "number")]
    pub expected: u64,
    #[ts(type = "number")]
    pub actual: u64,
    #[serde(rename = "match")]
    pub matched: bool,
}

/// One circular foreign-key value removed before insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CarryEntry {
    pub table: String,
    #[ts(type = "string | number")]
    pub row_id: Value,
    pub column: String,
    #[ts(type = "unknown")]
    pub value: Value,
}

impl CarryEntry {
    /// `<rowId>::<column>`, unique within one table.
    pub fn key(&self) -> String {
        let id = match &self.row_id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        format!("{}::{}", id, self.column)
    }
}

/// Append `incoming` to `carry`, skipping entries already present.
pub fn merge_carry(carry: &mut Vec<CarryEntry>, incoming: impl IntoIterator<Item = CarryEntry>) {
    for entry in incoming {
        let key = entry.key();
        if !carry
            .iter()
            .any(|known| known.table == entry.table && known.key() == key)
        {
            carry.push(entry);
        }
    }
}

/// Leave the tracker in its error state when a top-level restore call fails.
pub(crate) fn record_failure<T>(
    progress: &ProgressTracker,
    reset_delay: Duration,
    result: Result<T, ImportError>,
) -> Result<T, ImportError> {
    if let Err(err) = &result {
        progress.set(ProgressUpdate::new().operation(Operation::Import));
        progress.fail(err.to_string());
        progress.schedule_reset(reset_delay);
    }
    result
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ImportOutcome {
    pub tables: Vec<TableOutcome>,
    pub deletions: Vec<DeleteOutcome>,
    pub verification: Vec<VerificationEntry>,
    #[ts(type = "number")]
    pub circular_restored: u64,
    #[ts(type = "number")]
    pub circular_failed: u64,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("snapshot failed validation: {}", .errors.join("; "))]
    InvalidSnapshot { errors: Vec<String> },
    #[error("snapshot could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("restore job {0} not found")]
    JobNotFound(String),
    #[error("restore job {0} is still in progress")]
    JobActive(String),
    #[error("restore job {job}: {reason}")]
    JobMismatch { job: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("restore job storage failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ImportError> for AppError {
    fn from(error: ImportError) -> Self {
        match error {
            ImportError::InvalidSnapshot { errors } => {
                let message = format!("Snapshot failed validation: {}", errors.join("; "));
                AppError::new(AppError::INVALID_SNAPSHOT, message)
                    .with_context("error_count", errors.len().to_string())
            }
            ImportError::Decode(err) => AppError::from(err),
            ImportError::JobNotFound(job) => {
                AppError::new(AppError::JOB_NOT_FOUND, format!("Restore job {job} not found"))
                    .with_context("job_id", job)
            }
            ImportError::JobActive(job) => AppError::new(
                AppError::BUSY,
                format!("Restore job {job} is still in progress"),
            )
            .with_context("job_id", job),
            ImportError::JobMismatch { job, reason } => {
                AppError::bad_request(reason).with_context("job_id", job)
            }
            ImportError::Store(err) => AppError::from(err),
            ImportError::Database(err) => AppError::from(err),
        }
    }
}

/// `2 * tables + 2` steps: a delete and an insert per table, then replay and verify.
pub(crate) fn total_steps(tables: usize) -> usize {
    tables * 2 + 2
}
