use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::export::manifest::{
    checksum, SNAPSHOT_FORMAT, SNAPSHOT_FORMAT_FAMILY, SNAPSHOT_VERSION,
};
use crate::topology::{self, MESSAGING_TABLES, SESSION_TABLES};

/// How much work validation may do.
///
/// `Light` skips every hash and is what a client runs before uploading a
/// large file. `Full` additionally recomputes per-table and payload checksums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ValidationTier {
    #[default]
    Full,
    Light,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValidationSummary {
    pub format: Option<String>,
    pub version: Option<String>,
    pub created_at: Option<String>,
    pub created_by: Option<String>,
    #[ts(type = "number")]
    pub table_count: u64,
    #[ts(type = "number")]
    pub total_rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[ts(optional)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ValidationSummary>,
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn into_report(self, summary: Option<ValidationSummary>) -> ValidationReport {
        ValidationReport {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            summary,
        }
    }
}

/// Lenient semver parse: "2" and "2.0" are read as 2.0.0.
fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let padded = match trimmed.matches('.').count() {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).ok()
}

fn check_format(meta: &Map<String, Value>, findings: &mut Findings) {
    match meta.get("format").and_then(Value::as_str) {
        Some(SNAPSHOT_FORMAT) => {}
        Some(other) if other.starts_with(SNAPSHOT_FORMAT_FAMILY) => findings.warn(format!(
            "snapshot format {other} belongs to a different project; restoring across projects"
        )),
        Some(other) => findings.error(format!("unrecognized snapshot format {other:?}")),
        None => findings.error("_meta.format is missing"),
    }
}

fn check_version(meta: &Map<String, Value>, findings: &mut Findings) {
    let Some(found) = meta.get("version").and_then(Value::as_str) else {
        findings.warn("_meta.version is missing");
        return;
    };
    if found == SNAPSHOT_VERSION {
        return;
    }
    let major_note = match (parse_version(found), parse_version(SNAPSHOT_VERSION)) {
        (Some(found), Some(expected)) if found.major != expected.major => {
            " (different major version)"
        }
        _ => "",
    };
    findings.warn(format!(
        "snapshot version {found} does not match expected version {SNAPSHOT_VERSION}{major_note}"
    ));
}

/// Check the `_meta` block alone.
///
/// Used by the per-table restore, whose init call only receives the metadata.
pub fn validate_meta(meta: &Value) -> ValidationReport {
    let mut findings = Findings::default();
    match meta.as_object() {
        Some(meta) => {
            check_format(meta, &mut findings);
            check_version(meta, &mut findings);
        }
        None => findings.error("_meta is missing or not an object"),
    }
    findings.into_report(None)
}

/// Validate a candidate snapshot document without touching the database.
pub fn validate(document: &Value, tier: ValidationTier) -> ValidationReport {
    let mut findings = Findings::default();

    let Some(root) = document.as_object() else {
        findings.error("snapshot is not a JSON object");
        return findings.into_report(None);
    };
    let Some(meta) = root.get("_meta").and_then(Value::as_object) else {
        findings.error("_meta is missing or not an object");
        return findings.into_report(None);
    };
    check_format(meta, &mut findings);
    check_version(meta, &mut findings);

    let manifest = root.get("_manifest").and_then(Value::as_object);
    let tables = root.get("tables").and_then(Value::as_object);
    if manifest.is_none() {
        findings.error("_manifest is missing or not an object");
    }
    if tables.is_none() {
        findings.error("tables is missing or not an object");
    }
    let (Some(manifest), Some(tables)) = (manifest, tables) else {
        return findings.into_report(None);
    };

    let mut total_rows = 0_u64;
    for (name, rows) in tables {
        if !topology::is_known_table(name) {
            findings.warn(format!("unknown table {name} will be ignored"));
        }
        let Some(rows) = rows.as_array() else {
            findings.error(format!("table {name} is not an array"));
            continue;
        };
        total_rows += rows.len() as u64;
        if let Some(index) = rows.iter().position(|row| !row.is_object()) {
            findings.error(format!("table {name} row {index} is not an object"));
        }

        let Some(entry) = manifest.get(name) else {
            findings.warn(format!("table {name} has no manifest entry"));
            continue;
        };
        match entry.get("row_count").and_then(Value::as_u64) {
            Some(declared) if declared == rows.len() as u64 => {}
            Some(declared) => findings.error(format!(
                "table {name} has {} rows but the manifest declares {declared}",
                rows.len()
            )),
            None => findings.error(format!("manifest entry for {name} has no row_count")),
        }

        if tier == ValidationTier::Full {
            match entry.get("checksum").and_then(Value::as_str) {
                Some(declared) => match checksum(rows) {
                    Ok(actual) if actual == declared => {}
                    Ok(_) => findings.error(format!("checksum mismatch for table {name}")),
                    Err(err) => findings.error(format!("table {name} cannot be hashed: {err}")),
                },
                None => findings.warn(format!("manifest entry for {name} has no checksum")),
            }
        }
    }

    for name in manifest.keys() {
        if !tables.contains_key(name) {
            findings.warn(format!("manifest lists {name} but the table is absent"));
        }
    }
    for name in topology::full_table_order() {
        let optional = MESSAGING_TABLES.contains(name) || SESSION_TABLES.contains(name);
        if !optional && !tables.contains_key(*name) && !manifest.contains_key(*name) {
            findings.warn(format!("table {name} is missing from the snapshot"));
        }
    }

    if tier == ValidationTier::Full {
        match meta.get("checksum").and_then(Value::as_str) {
            Some(declared) => match checksum(tables) {
                Ok(actual) if actual == declared => {}
                Ok(_) => findings.error("payload checksum does not match _meta.checksum"),
                Err(err) => findings.error(format!("payload cannot be hashed: {err}")),
            },
            None => findings.warn("_meta.checksum is missing; payload integrity not verified"),
        }
    }

    if let Some(declared) = meta.get("total_rows").and_then(Value::as_u64) {
        if declared != total_rows {
            findings.warn(format!(
                "_meta.total_rows declares {declared} rows but tables hold {total_rows}"
            ));
        }
    }

    let text = |key: &str| meta.get(key).and_then(Value::as_str).map(str::to_string);
    let summary = ValidationSummary {
        format: text("format"),
        version: text("version"),
        created_at: text("created_at"),
        created_by: text("created_by"),
        table_count: tables.len() as u64,
        total_rows,
    };
    findings.into_report(Some(summary))
}
