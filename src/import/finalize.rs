use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{CarryEntry, VerificationEntry};
use crate::store::RowStore;
use crate::topology;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub restored: u64,
    pub failed: u64,
}

/// Write every carried circular foreign key back onto its row.
///
/// An empty carry is a no-op. Failures leave the column null and are counted.
pub async fn replay_carry(store: &dyn RowStore, carry: &[CarryEntry]) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();
    for entry in carry {
        match store
            .update_column(&entry.table, &entry.row_id, &entry.column, &entry.value)
            .await
        {
            Ok(affected) if affected > 0 => outcome.restored += 1,
            Ok(_) => {
                warn!(
                    target: "retail_vault",
                    event = "restore_fk_replay_missing_row",
                    table = %entry.table,
                    key = %entry.key()
                );
                outcome.failed += 1;
            }
            Err(err) => {
                warn!(
                    target: "retail_vault",
                    event = "restore_fk_replay_failed",
                    table = %entry.table,
                    key = %entry.key(),
                    error = %err
                );
                outcome.failed += 1;
            }
        }
    }
    if !carry.is_empty() {
        info!(
            target: "retail_vault",
            event = "restore_fk_replay_done",
            restored = outcome.restored,
            failed = outcome.failed
        );
    }
    outcome
}

/// Exact equality, or off by one for the protected identity row.
pub fn counts_match(expected: u64, actual: u64) -> bool {
    expected.abs_diff(actual) <= 1
}

/// Compare declared row counts against live counts, in registry order.
/// Tables outside the registry cannot be counted and are skipped.
pub async fn verify_counts(
    store: &dyn RowStore,
    expected: &BTreeMap<String, u64>,
) -> Vec<VerificationEntry> {
    let mut entries = Vec::with_capacity(expected.len());
    for table in topology::full_table_order() {
        let Some(&want) = expected.get(*table) else {
            continue;
        };
        let actual = match store.count(table).await {
            Ok(actual) => actual,
            Err(err) => {
                warn!(
                    target: "retail_vault",
                    event = "restore_verify_count_failed",
                    table = %table,
                    error = %err
                );
                0
            }
        };
        entries.push(VerificationEntry {
            table: table.to_string(),
            expected: want,
            actual,
            matched: counts_match(want, actual),
        });
    }
    for table in expected.keys().filter(|t| !topology::is_known_table(t)) {
        warn!(target: "retail_vault", event = "restore_verify_unknown_table", table = %table);
    }
    entries
}
