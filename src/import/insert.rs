use serde_json::Value;
use tracing::{debug, warn};

use super::protect::{filter_protected, RestorePath};
use super::sanitize::sanitize;
use super::{CarryEntry, TableOutcome, TableStatus};
use crate::store::RowStore;

/// Insert `rows` in batches of `batch_size`, retrying a failed batch one row at
/// a time. A row that fails on its own is dropped and counted against the table.
pub async fn insert_batches(
    store: &dyn RowStore,
    table: &str,
    rows: &[Value],
    batch_size: usize,
) -> TableOutcome {
    let expected = rows.len() as u64;
    let mut inserted = 0_u64;
    let mut last_error: Option<String> = None;

    for (index, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        match store.insert_rows(table, batch).await {
            Ok(count) => inserted += count,
            Err(err) => {
                warn!(
                    target: "retail_vault",
                    event = "restore_batch_fallback",
                    table = %table,
                    batch = index,
                    rows = batch.len(),
                    error = %err
                );
                for row in batch {
                    match store.insert_row(table, row).await {
                        Ok(()) => inserted += 1,
                        Err(err) => {
                            let row_id = row.get("id").cloned().unwrap_or_default();
                            debug!(
                                target: "retail_vault",
                                event = "restore_row_failed",
                                table = %table,
                                row_id = %row_id,
                                error = %err
                            );
                            last_error = Some(err.to_string());
                        }
                    }
                }
            }
        }
    }

    let status = TableStatus::classify(expected, inserted);
    if status != TableStatus::Ok {
        warn!(
            target: "retail_vault",
            event = "restore_table_incomplete",
            table = %table,
            expected,
            inserted
        );
    }
    TableOutcome {
        table: table.to_string(),
        expected,
        inserted,
        status,
        error: if inserted < expected { last_error } else { None },
    }
}

/// Filter, sanitize and insert one table's snapshot rows.
pub async fn restore_table(
    store: &dyn RowStore,
    table: &str,
    rows: &[Value],
    protected_id: Option<&str>,
    path: RestorePath,
    batch_size: usize,
) -> (TableOutcome, Vec<CarryEntry>) {
    let (rows, skipped) = filter_protected(table, rows, protected_id, path);
    if skipped > 0 {
        debug!(
            target: "retail_vault",
            event = "restore_protected_rows_skipped",
            table = %table,
            skipped
        );
    }
    let sanitized = sanitize(table, &rows);
    let outcome = insert_batches(store, table, &sanitized.rows, batch_size).await;
    (outcome, sanitized.carry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::store::SqliteRowStore;
    use serde_json::json;

    #[tokio::test]
    async fn one_bad_row_leaves_the_rest_of_its_batch() {
        let store = SqliteRowStore::new(memory_pool().await);
        let mut rows: Vec<Value> = (0..6)
            .map(|i| json!({"id": format!("c{i}"), "name": format!("Customer {i}")}))
            .collect();
        rows[3]["name"] = Value::Null;

        let outcome = insert_batches(&store, "customers", &rows, 4).await;
        assert_eq!(outcome.expected, 6);
        assert_eq!(outcome.inserted, 5);
        assert_eq!(outcome.status, TableStatus::Partial);
        assert!(outcome.error.unwrap().contains("NOT NULL"));
        assert_eq!(store.count("customers").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn every_row_failing_is_an_error_status() {
        let store = SqliteRowStore::new(memory_pool().await);
        let rows = vec![json!({"id": "p1"}), json!({"id": "p2"})];
        let outcome = insert_batches(&store, "products", &rows, 10).await;
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.status, TableStatus::Error);
    }

    #[tokio::test]
    async fn restore_table_returns_carry_for_self_references() {
        let store = SqliteRowStore::new(memory_pool().await);
        let rows = vec![
            json!({"id": "c2", "name": "Grace", "referred_by": "c1"}),
            json!({"id": "c1", "name": "Ada", "referred_by": null}),
        ];
        let (outcome, carry) = restore_table(
            &store,
            "customers",
            &rows,
            None,
            RestorePath::Bulk,
            100,
        )
        .await;
        assert_eq!(outcome.status, TableStatus::Ok);
        assert_eq!(carry.len(), 1);
        assert_eq!(carry[0].key(), "c2::referred_by");
    }
}
