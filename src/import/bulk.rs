use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{error, info, warn};

use super::finalize::{replay_carry, verify_counts};
use super::insert::restore_table;
use super::protect::{wipe_table, RestorePath};
use super::validator::{validate, ValidationTier};
use super::{merge_carry, total_steps, ImportError, ImportOptions, ImportOutcome};
use crate::export::manifest::Snapshot;
use crate::progress::{percent, Operation, ProgressTracker, ProgressUpdate};
use crate::store::RowStore;
use crate::topology;

/// Restore a whole snapshot in one call.
///
/// Only an invalid or undecodable snapshot aborts the run, and it does so before
/// any table is touched. Everything after that degrades into the outcome.
pub async fn import_bulk(
    store: &dyn RowStore,
    progress: &ProgressTracker,
    document: &Value,
    opts: &ImportOptions,
) -> Result<ImportOutcome, ImportError> {
    progress.begin(Operation::Import, "validating");

    let report = validate(document, ValidationTier::Full);
    if !report.valid {
        error!(
            target: "retail_vault",
            event = "restore_rejected",
            errors = report.errors.len()
        );
        progress.fail(report.errors.join("; "));
        progress.schedule_reset(opts.reset_delay);
        return Err(ImportError::InvalidSnapshot {
            errors: report.errors,
        });
    }
    let snapshot: Snapshot = match serde_json::from_value(document.clone()) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            progress.fail(err.to_string());
            progress.schedule_reset(opts.reset_delay);
            return Err(ImportError::Decode(err));
        }
    };

    let tables: Vec<&'static str> = topology::full_table_order()
        .iter()
        .copied()
        .filter(|table| snapshot.tables.contains_key(*table))
        .collect();
    for name in snapshot.tables.keys() {
        if !topology::is_known_table(name) {
            warn!(target: "retail_vault", event = "restore_unknown_table_ignored", table = %name);
        }
    }

    let steps = total_steps(tables.len());
    let mut step = 0_usize;
    let protected_id = opts.protected_id.as_deref();
    info!(
        target: "retail_vault",
        event = "restore_start",
        tables = tables.len(),
        protected = protected_id.is_some()
    );
    progress.set(
        ProgressUpdate::new()
            .phase("deleting")
            .tables_total(tables.len() as u32),
    );

    let mut outcome = ImportOutcome::default();
    for table in tables.iter().rev() {
        progress.set(ProgressUpdate::new().current_table(Some(table)));
        outcome
            .deletions
            .push(wipe_table(store, table, protected_id).await);
        step += 1;
        progress.set(ProgressUpdate::new().progress(percent(step, steps)));
    }

    progress.set(ProgressUpdate::new().phase("inserting"));
    let mut carry = Vec::new();
    for (index, table) in tables.iter().enumerate() {
        progress.set(ProgressUpdate::new().current_table(Some(table)));
        let rows = snapshot
            .tables
            .get(*table)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let (table_outcome, table_carry) = restore_table(
            store,
            table,
            rows,
            protected_id,
            RestorePath::Bulk,
            opts.batch_size,
        )
        .await;
        outcome.tables.push(table_outcome);
        merge_carry(&mut carry, table_carry);
        step += 1;
        progress.set(
            ProgressUpdate::new()
                .tables_completed(index as u32 + 1)
                .progress(percent(step, steps)),
        );
    }

    progress.set(
        ProgressUpdate::new()
            .phase("finalizing-fk")
            .current_table(None),
    );
    let replay = replay_carry(store, &carry).await;
    outcome.circular_restored = replay.restored;
    outcome.circular_failed = replay.failed;
    step += 1;
    progress.set(ProgressUpdate::new().progress(percent(step, steps)));

    progress.set(ProgressUpdate::new().phase("verifying"));
    let expected: BTreeMap<String, u64> = snapshot
        .manifest
        .iter()
        .map(|(table, entry)| (table.clone(), entry.row_count))
        .collect();
    outcome.verification = verify_counts(store, &expected).await;

    progress.set(ProgressUpdate::new().phase("done").progress(100));
    progress.schedule_reset(opts.reset_delay);
    info!(
        target: "retail_vault",
        event = "restore_done",
        tables = outcome.tables.len(),
        mismatched = outcome.verification.iter().filter(|v| !v.matched).count(),
        circular_failed = outcome.circular_failed
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::export::{export_snapshot, ExportOptions};
    use crate::import::TableStatus;
    use crate::store::SqliteRowStore;
    use serde_json::json;

    #[tokio::test]
    async fn invalid_snapshot_touches_nothing() {
        let store = SqliteRowStore::new(memory_pool().await);
        store
            .insert_row("customers", &json!({"id": "c1", "name": "Ada"}))
            .await
            .unwrap();
        let progress = ProgressTracker::new();

        let err = import_bulk(
            &store,
            &progress,
            &json!({"_meta": {"format": "nope"}}),
            &ImportOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidSnapshot { .. }));
        assert_eq!(store.count("customers").await.unwrap(), 1);
        assert!(progress.get().error.is_some());
    }

    #[tokio::test]
    async fn export_then_restore_into_a_populated_store() {
        let store = SqliteRowStore::new(memory_pool().await);
        store
            .insert_rows(
                "customers",
                &[
                    json!({"id": "c1", "name": "Ada"}),
                    json!({"id": "c2", "name": "Grace", "referred_by": "c1"}),
                ],
            )
            .await
            .unwrap();
        let progress = ProgressTracker::new();
        let exported = export_snapshot(&store, &progress, &ExportOptions::new("admin"))
            .await
            .unwrap();
        let document = serde_json::to_value(&exported.snapshot).unwrap();

        store
            .insert_row("customers", &json!({"id": "c3", "name": "Stray"}))
            .await
            .unwrap();

        let outcome = import_bulk(&store, &progress, &document, &ImportOptions::default())
            .await
            .unwrap();
        let customers = outcome
            .tables
            .iter()
            .find(|t| t.table == "customers")
            .unwrap();
        assert_eq!(customers.status, TableStatus::Ok);
        assert_eq!(customers.inserted, 2);
        assert_eq!(outcome.circular_restored, 1);
        assert!(outcome.verification.iter().all(|v| v.matched));

        let rows = store.select_page("customers", 0, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["referred_by"], "c1");

        let state = progress.get();
        assert_eq!(state.phase, "done");
        assert_eq!(state.progress, 100);
    }
}
