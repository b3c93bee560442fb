use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::validator::ValidationReport;
use super::ImportOutcome;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    snapshot_path: String,
    protected_id: Option<&'a str>,
    validation: &'a ValidationReport,
    outcome: &'a ImportOutcome,
}

/// Write `import-YYYYMMDD-HHMMSS.json` into `reports_dir` and return its path.
pub fn write_import_report(
    reports_dir: &Path,
    snapshot_path: &Path,
    protected_id: Option<&str>,
    validation: &ValidationReport,
    outcome: &ImportOutcome,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let timestamp = Utc::now().format("import-%Y%m%d-%H%M%S.json");
    let path = reports_dir.join(timestamp.to_string());
    let payload = ImportReportFile {
        generated_at: Utc::now().to_rfc3339(),
        snapshot_path: snapshot_path.display().to_string(),
        protected_id,
        validation,
        outcome,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}
