//! Handling of the acting administrator's own identity rows during a restore.
//!
//! The wipe keeps them, and the insert phase drops their snapshot copies so
//! they are never duplicated. The two restore paths match `user_profiles` on
//! different columns; see [`crate::topology::ProtectedRule`].

use serde_json::Value;
use tracing::{info, warn};

use super::DeleteOutcome;
use crate::store::RowStore;
use crate::topology;

/// Which restore path is filtering rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePath {
    Bulk,
    Incremental,
}

fn filter_key(table: &str, path: RestorePath) -> Option<&'static str> {
    topology::protected_rule_for(table).map(|rule| match path {
        RestorePath::Bulk => rule.bulk_filter_key,
        RestorePath::Incremental => rule.incremental_filter_key,
    })
}

/// Drop the protected identity's rows from `rows`. Returns the kept rows and
/// how many were dropped.
pub fn filter_protected(
    table: &str,
    rows: &[Value],
    protected_id: Option<&str>,
    path: RestorePath,
) -> (Vec<Value>, u64) {
    let (Some(protected_id), Some(key)) = (protected_id, filter_key(table, path)) else {
        return (rows.to_vec(), 0);
    };
    let mut dropped = 0;
    let kept = rows
        .iter()
        .filter(|row| {
            let own = row.get(key).and_then(Value::as_str) == Some(protected_id);
            if own {
                dropped += 1;
            }
            !own
        })
        .cloned()
        .collect();
    (kept, dropped)
}

/// Delete one table, keeping the protected identity's rows when the table has
/// a protection rule.
pub async fn wipe_table(
    store: &dyn RowStore,
    table: &str,
    protected_id: Option<&str>,
) -> DeleteOutcome {
    let rule = topology::protected_rule_for(table);
    let result = match (rule, protected_id) {
        (Some(rule), Some(keep)) => store.delete_except(table, rule.delete_key, keep).await,
        _ => store.delete_all(table).await,
    };
    match result {
        Ok(deleted) => {
            info!(target: "retail_vault", event = "restore_table_wiped", table = %table, deleted);
            DeleteOutcome {
                table: table.to_string(),
                deleted,
                error: None,
            }
        }
        Err(err) => {
            warn!(
                target: "retail_vault",
                event = "restore_delete_failed",
                table = %table,
                error = %err
            );
            DeleteOutcome {
                table: table.to_string(),
                deleted: 0,
                error: Some(err.to_string()),
            }
        }
    }
}
