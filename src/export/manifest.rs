use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::time::now_rfc3339;

/// Format tag written into every snapshot. The part before the `/` names the
/// snapshot family shared by sibling deployments; the suffix names this project.
pub const SNAPSHOT_FORMAT: &str = "commerce-snapshot/retail-vault";
pub const SNAPSHOT_FORMAT_FAMILY: &str = "commerce-snapshot/";
pub const SNAPSHOT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export)]
pub struct SnapshotMeta {
    pub format: String,
    pub version: String,
    pub created_at: String,
    pub created_by: String,
    #[ts(type = "number")]
    pub table_count: u64,
    #[ts(type = "number")]
    pub total_rows: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export)]
pub struct TableManifest {
    #[ts(type = "number")]
    pub row_count: u64,
    pub checksum: String,
}

/// The exported document: metadata, per-table manifest and the rows themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_meta")]
    pub meta: SnapshotMeta,
    #[serde(rename = "_manifest")]
    pub manifest: BTreeMap<String, TableManifest>,
    pub tables: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    /// Assemble a snapshot from fully fetched tables, computing every checksum.
    pub fn assemble(
        tables: BTreeMap<String, Vec<Value>>,
        created_by: impl Into<String>,
    ) -> serde_json::Result<Self> {
        let mut manifest = BTreeMap::new();
        let mut total_rows = 0_u64;
        for (name, rows) in &tables {
            total_rows += rows.len() as u64;
            manifest.insert(
                name.clone(),
                TableManifest {
                    row_count: rows.len() as u64,
                    checksum: checksum(rows)?,
                },
            );
        }
        let meta = SnapshotMeta {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION.to_string(),
            created_at: now_rfc3339(),
            created_by: created_by.into(),
            table_count: tables.len() as u64,
            total_rows,
            checksum: checksum(&tables)?,
        };
        Ok(Self {
            meta,
            manifest,
            tables,
        })
    }
}

struct DigestWriter<'a>(&'a mut Sha256);

impl Write for DigestWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// SHA-256 (lowercase hex) of the compact JSON serialization of `value`.
///
/// Object keys are emitted in sorted order because `serde_json::Map` is ordered,
/// so two documents that differ only in key order hash the same. Array order is
/// significant.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(DigestWriter(&mut hasher), value)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn checksum_matches_plain_sha256_of_compact_json() {
        let rows = vec![json!({"id": "c1", "name": "Ada"})];
        let expected = format!(
            "{:x}",
            Sha256::digest(br#"[{"id":"c1","name":"Ada"}]"#)
        );
        assert_eq!(checksum(&rows).unwrap(), expected);
    }

    #[test]
    fn checksum_is_order_sensitive_for_rows() {
        let a = vec![json!({"id": 1}), json!({"id": 2})];
        let b = vec![json!({"id": 2}), json!({"id": 1})];
        assert_ne!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn checksum_ignores_source_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn assemble_fills_manifest_and_meta() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "customers".to_string(),
            vec![json!({"id": "c1"}), json!({"id": "c2"}), json!({"id": "c3"})],
        );
        tables.insert("brands".to_string(), Vec::new());
        let snapshot = Snapshot::assemble(tables, "admin@example.com").unwrap();

        assert_eq!(snapshot.meta.format, SNAPSHOT_FORMAT);
        assert_eq!(snapshot.meta.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.meta.table_count, 2);
        assert_eq!(snapshot.meta.total_rows, 3);
        assert_eq!(snapshot.manifest["customers"].row_count, 3);
        assert_eq!(snapshot.manifest["brands"].row_count, 0);
        assert_eq!(
            snapshot.manifest["customers"].checksum,
            checksum(&snapshot.tables["customers"]).unwrap()
        );
        assert_eq!(snapshot.meta.checksum, checksum(&snapshot.tables).unwrap());
    }

    #[test]
    fn serialized_snapshot_uses_underscored_sections() {
        let snapshot = Snapshot::assemble(BTreeMap::new(), "admin").unwrap();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("_meta").is_some());
        assert!(value.get("_manifest").is_some());
        assert!(value.get("tables").is_some());
    }

    #[test]
    fn typed_and_untyped_tables_hash_identically() {
        let mut tables = BTreeMap::new();
        tables.insert("orders".to_string(), vec![json!({"id": "o1", "total": 12.5})]);
        tables.insert("brands".to_string(), vec![json!({"id": "b1"})]);
        let untyped = serde_json::to_value(&tables).unwrap();
        assert_eq!(checksum(&tables).unwrap(), checksum(&untyped).unwrap());
    }

    proptest! {
        #[test]
        fn checksum_survives_a_serialization_round_trip(
            names in proptest::collection::vec("[a-z]{1,8}", 0..8),
            amounts in proptest::collection::vec(-1_000_000i64..1_000_000, 0..8),
        ) {
            let rows: Vec<Value> = names
                .iter()
                .zip(amounts.iter())
                .map(|(name, amount)| json!({"name": name, "amount": amount, "note": null}))
                .collect();
            let text = serde_json::to_string(&rows).unwrap();
            let reparsed: Vec<Value> = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(checksum(&rows).unwrap(), checksum(&reparsed).unwrap());
        }
    }
}
