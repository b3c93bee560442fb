use serde_json::Value;
use tracing::warn;

use super::CarryEntry;
use crate::topology;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub rows: Vec<Value>,
    pub carry: Vec<CarryEntry>,
}

/// Null out every circular foreign key of `table` in copies of `rows`.
///
/// The removed values are returned as carry entries keyed by the row's `id`.
/// A row without an `id` is still cleaned, but its values cannot be replayed
/// and are dropped with a warning.
pub fn sanitize(table: &str, rows: &[Value]) -> Sanitized {
    let fks: Vec<_> = topology::circular_fks_for(table).collect();
    if fks.is_empty() {
        return Sanitized {
            rows: rows.to_vec(),
            carry: Vec::new(),
        };
    }

    let mut carry = Vec::new();
    let cleaned = rows
        .iter()
        .map(|row| {
            let mut copy = row.clone();
            let Some(object) = copy.as_object_mut() else {
                return copy;
            };
            let row_id = object.get("id").filter(|id| !id.is_null()).cloned();
            for fk in &fks {
                let Some(slot) = object.get_mut(fk.column) else {
                    continue;
                };
                if slot.is_null() {
                    continue;
                }
                let value = slot.take();
                match &row_id {
                    Some(row_id) => carry.push(CarryEntry {
                        table: table.to_string(),
                        row_id: row_id.clone(),
                        column: fk.column.to_string(),
                        value,
                    }),
                    None => warn!(
                        target: "retail_vault",
                        event = "restore_circular_value_dropped",
                        table = %table,
                        column = %fk.column,
                        value = %value
                    ),
                }
            }
            copy
        })
        .collect();

    Sanitized {
        rows: cleaned,
        carry,
    }
}
