use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::progress::{percent, Operation, ProgressTracker, ProgressUpdate};
use crate::store::{RowStore, StoreError};
use crate::topology::ExportSelection;
use crate::{AppError, AppResult};

use self::manifest::Snapshot;

pub mod manifest;

pub const DEFAULT_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub selection: ExportSelection,
    pub page_size: u64,
    pub created_by: String,
    pub reset_delay: Duration,
}

impl ExportOptions {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            selection: ExportSelection::default(),
            page_size: DEFAULT_PAGE_SIZE,
            created_by: created_by.into(),
            reset_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub snapshot: Snapshot,
    /// Tables whose fetch failed and were exported as empty.
    pub skipped_tables: Vec<String>,
}

impl ExportOutcome {
    /// Suggested download name, `retail-vault-backup-YYYYMMDD-HHMMSS.json`.
    pub fn file_name(&self) -> String {
        format!(
            "retail-vault-backup-{}.json",
            Utc::now().format("%Y%m%d-%H%M%S")
        )
    }
}

/// Page through one table until a short page comes back.
async fn fetch_table(
    store: &dyn RowStore,
    table: &str,
    page_size: u64,
) -> Result<Vec<Value>, StoreError> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0_u64;
    loop {
        let page = store.select_page(table, offset, page_size).await?;
        let fetched = page.len() as u64;
        rows.extend(page);
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    Ok(rows)
}

/// Export every selected table into a single snapshot.
///
/// A table that cannot be read is logged, exported as empty and reported in
/// [`ExportOutcome::skipped_tables`]; it never aborts the export.
pub async fn export_snapshot(
    store: &dyn RowStore,
    progress: &ProgressTracker,
    opts: &ExportOptions,
) -> AppResult<ExportOutcome> {
    let tables = opts.selection.tables();
    let total = tables.len();
    progress.begin(Operation::Export, "fetching");
    progress.set(ProgressUpdate::new().tables_total(total as u32));
    info!(target: "retail_vault", event = "backup_export_start", tables = total);

    let mut payload: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut skipped_tables = Vec::new();
    for (index, table) in tables.iter().enumerate() {
        progress.set(ProgressUpdate::new().current_table(Some(table)));
        let rows = match fetch_table(store, table, opts.page_size).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    target: "retail_vault",
                    event = "backup_export_table_failed",
                    table = %table,
                    error = %err
                );
                skipped_tables.push(table.to_string());
                Vec::new()
            }
        };
        payload.insert(table.to_string(), rows);
        // The last step is the checksum pass, so a finished fetch stays below 100.
        progress.set(
            ProgressUpdate::new()
                .tables_completed(index as u32 + 1)
                .progress(percent(index + 1, total + 1)),
        );
    }

    progress.set(
        ProgressUpdate::new()
            .phase("checksumming")
            .current_table(None),
    );
    let snapshot = match Snapshot::assemble(payload, opts.created_by.clone()) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let err = AppError::from(err).with_context("operation", "assemble_snapshot");
            progress.fail(err.message());
            progress.schedule_reset(opts.reset_delay);
            return Err(err);
        }
    };

    progress.set(ProgressUpdate::new().phase("done").progress(100));
    progress.schedule_reset(opts.reset_delay);
    info!(
        target: "retail_vault",
        event = "backup_export_done",
        tables = snapshot.meta.table_count,
        rows = snapshot.meta.total_rows,
        skipped = skipped_tables.len()
    );
    Ok(ExportOutcome {
        snapshot,
        skipped_tables,
    })
}
