//! Per-table restore: init, one call per table, finalize.
//!
//! Each call is short enough to fit a single request budget. State between
//! calls lives in a [`RestoreJob`] row; the caller still echoes the protected
//! id and its carry, and both are checked against or merged into the job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use ts_rs::TS;

use super::finalize::{replay_carry, verify_counts};
use super::insert::restore_table;
use super::jobs::{JobStore, RestoreJob, PHASE_DONE};
use super::protect::{wipe_table, RestorePath};
use super::validator::validate_meta;
use super::{
    merge_carry, record_failure, total_steps, CarryEntry, DeleteOutcome, ImportError,
    ImportOptions, TableOutcome, VerificationEntry,
};
use crate::progress::{percent, Operation, ProgressTracker, ProgressUpdate};
use crate::store::RowStore;
use crate::topology;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InitRequest {
    #[serde(rename = "_meta", alias = "meta")]
    #[ts(type = "Record<string, unknown>")]
    pub meta: Value,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InitResponse {
    pub job_id: String,
    pub protected_id: Option<String>,
    pub tables_total: u32,
    pub deletions: Vec<DeleteOutcome>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TableRequest {
    pub job_id: String,
    pub table: String,
    #[ts(type = "Array<Record<string, unknown>>")]
    pub rows: Vec<Value>,
    #[serde(default)]
    #[ts(optional)]
    pub protected_id: Option<String>,
    /// Caller's view of completed tables; informational only.
    #[serde(default)]
    #[ts(optional)]
    pub tables_completed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TableResponse {
    #[serde(flatten)]
    pub outcome: TableOutcome,
    pub circular_carry_entries: Vec<CarryEntry>,
    pub tables_completed: u32,
    pub tables_total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FinalizeRequest {
    pub job_id: String,
    #[serde(default)]
    pub circular_carry_entries: Vec<CarryEntry>,
    /// Declared row count per table, usually taken from the snapshot manifest.
    #[ts(type = "Record<string, number>")]
    pub expected: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FinalizeResponse {
    pub verification: Vec<VerificationEntry>,
    #[ts(type = "number")]
    pub circular_restored: u64,
    #[ts(type = "number")]
    pub circular_failed: u64,
}

fn report_step(progress: &ProgressTracker, job: &RestoreJob, extra_steps: usize) {
    let total = job.tables_total() as usize;
    let step = total + job.tables_completed() as usize + extra_steps;
    progress.set(
        ProgressUpdate::new()
            .tables_completed(job.tables_completed())
            .tables_total(job.tables_total())
            .progress(percent(step, total_steps(total))),
    );
}

/// Open a restore job and wipe every named table, keeping the protected rows.
pub async fn import_init(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &InitRequest,
    opts: &ImportOptions,
    job_ttl_ms: i64,
) -> Result<InitResponse, ImportError> {
    let result = open_job(store, jobs, progress, request, opts, job_ttl_ms).await;
    record_failure(progress, opts.reset_delay, result)
}

async fn open_job(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &InitRequest,
    opts: &ImportOptions,
    job_ttl_ms: i64,
) -> Result<InitResponse, ImportError> {
    let report = validate_meta(&request.meta);
    if !report.valid {
        return Err(ImportError::InvalidSnapshot {
            errors: report.errors,
        });
    }
    if let Some(active) = jobs.active(job_ttl_ms).await? {
        return Err(ImportError::JobActive(active.id));
    }

    let mut warnings = report.warnings;
    for name in &request.tables {
        if !topology::is_known_table(name) {
            warnings.push(format!("unknown table {name} will be ignored"));
        }
    }
    let tables: Vec<&'static str> = topology::full_table_order()
        .iter()
        .copied()
        .filter(|table| request.tables.iter().any(|name| name == table))
        .collect();
    let steps = total_steps(tables.len());
    let protected_id = opts.protected_id.as_deref();

    progress.begin(Operation::Import, "deleting");
    progress.set(ProgressUpdate::new().tables_total(tables.len() as u32));
    let mut deletions = Vec::with_capacity(tables.len());
    for (done, table) in tables.iter().rev().enumerate() {
        progress.set(ProgressUpdate::new().current_table(Some(table)));
        deletions.push(wipe_table(store, table, protected_id).await);
        progress.set(ProgressUpdate::new().progress(percent(done + 1, steps)));
    }

    let job = jobs.create(protected_id, &tables).await?;
    progress.set(
        ProgressUpdate::new()
            .phase("inserting")
            .current_table(None),
    );
    info!(
        target: "retail_vault",
        event = "restore_job_started",
        job_id = %job.id,
        tables = tables.len()
    );
    Ok(InitResponse {
        tables_total: job.tables_total(),
        job_id: job.id,
        protected_id: job.protected_id,
        deletions,
        warnings,
    })
}

fn check_protected(job: &RestoreJob, claimed: Option<&str>) -> Result<(), ImportError> {
    match claimed {
        Some(claimed) if job.protected_id.as_deref() != Some(claimed) => {
            Err(ImportError::JobMismatch {
                job: job.id.clone(),
                reason: "protectedId does not match the restore job".to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn check_open(job: &RestoreJob) -> Result<(), ImportError> {
    if job.is_finished() {
        return Err(ImportError::JobMismatch {
            job: job.id.clone(),
            reason: "restore job is already finalized".to_string(),
        });
    }
    Ok(())
}

/// Insert one table's rows into an open job.
///
/// The table must be one the job wiped at init and not yet restored.
pub async fn import_table(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &TableRequest,
    opts: &ImportOptions,
) -> Result<TableResponse, ImportError> {
    let result = restore_job_table(store, jobs, progress, request, opts).await;
    record_failure(progress, opts.reset_delay, result)
}

async fn restore_job_table(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &TableRequest,
    opts: &ImportOptions,
) -> Result<TableResponse, ImportError> {
    let job = jobs.load(&request.job_id).await?;
    check_open(&job)?;
    check_protected(&job, request.protected_id.as_deref())?;
    job.check_table(&request.table)?;
    let Some(table) = topology::known_table(&request.table) else {
        return Err(ImportError::JobMismatch {
            job: job.id.clone(),
            reason: format!("unknown table {}", request.table),
        });
    };
    if let Some(claimed) = request.tables_completed {
        if claimed != job.tables_completed() {
            warn!(
                target: "retail_vault",
                event = "restore_job_cursor_drift",
                job_id = %job.id,
                claimed,
                recorded = job.tables_completed()
            );
        }
    }

    progress.set(
        ProgressUpdate::new()
            .operation(Operation::Import)
            .phase("inserting")
            .current_table(Some(table)),
    );
    let (outcome, carry) = restore_table(
        store,
        table,
        &request.rows,
        job.protected_id.as_deref(),
        RestorePath::Incremental,
        opts.batch_size,
    )
    .await;

    let job = jobs.record_table(&job.id, table, carry.clone()).await?;
    report_step(progress, &job, 0);
    Ok(TableResponse {
        outcome,
        circular_carry_entries: carry,
        tables_completed: job.tables_completed(),
        tables_total: job.tables_total(),
    })
}

/// Replay every carried foreign key and verify counts, then close the job.
pub async fn import_finalize(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &FinalizeRequest,
    opts: &ImportOptions,
) -> Result<FinalizeResponse, ImportError> {
    let result = close_job(store, jobs, progress, request, opts).await;
    record_failure(progress, opts.reset_delay, result)
}

async fn close_job(
    store: &dyn RowStore,
    jobs: &JobStore,
    progress: &ProgressTracker,
    request: &FinalizeRequest,
    opts: &ImportOptions,
) -> Result<FinalizeResponse, ImportError> {
    let job = jobs.load(&request.job_id).await?;
    check_open(&job)?;

    let mut carry = job.carry.clone();
    let persisted = carry.len();
    merge_carry(&mut carry, request.circular_carry_entries.iter().cloned());
    if carry.len() > persisted {
        warn!(
            target: "retail_vault",
            event = "restore_job_carry_from_client",
            job_id = %job.id,
            extra = carry.len() - persisted
        );
    }

    progress.set(
        ProgressUpdate::new()
            .operation(Operation::Import)
            .phase("finalizing-fk")
            .current_table(None),
    );
    let replay = replay_carry(store, &carry).await;
    report_step(progress, &job, 1);

    progress.set(ProgressUpdate::new().phase("verifying"));
    let verification = verify_counts(store, &request.expected).await;
    jobs.set_phase(&job.id, PHASE_DONE).await?;

    progress.set(ProgressUpdate::new().phase("done").progress(100));
    progress.schedule_reset(opts.reset_delay);
    info!(
        target: "retail_vault",
        event = "restore_job_finished",
        job_id = %job.id,
        circular_restored = replay.restored,
        circular_failed = replay.failed
    );
    Ok(FinalizeResponse {
        verification,
        circular_restored: replay.restored,
        circular_failed: replay.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::export::manifest::SNAPSHOT_FORMAT;
    use crate::import::TableStatus;
    use crate::store::SqliteRowStore;
    use serde_json::json;

    fn meta() -> Value {
        json!({"format": SNAPSHOT_FORMAT, "version": "2.0"})
    }

    #[tokio::test]
    async fn init_table_finalize_round_trip() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();
        let opts = ImportOptions::default();

        let init = import_init(
            &store,
            &jobs,
            &progress,
            &InitRequest {
                meta: meta(),
                tables: vec!["product_categories".into(), "bogus".into()],
            },
            &opts,
            60_000,
        )
        .await
        .unwrap();
        assert_eq!(init.tables_total, 1);
        assert_eq!(init.warnings.len(), 1);

        let response = import_table(
            &store,
            &jobs,
            &progress,
            &TableRequest {
                job_id: init.job_id.clone(),
                table: "product_categories".into(),
                rows: vec![
                    json!({"id": "mugs", "name": "Mugs", "parent_id": "root"}),
                    json!({"id": "root", "name": "All"}),
                ],
                protected_id: None,
                tables_completed: Some(0),
            },
            &opts,
        )
        .await
        .unwrap();
        assert_eq!(response.outcome.status, TableStatus::Ok);
        assert_eq!(response.circular_carry_entries.len(), 1);
        assert_eq!(response.tables_completed, 1);

        // The caller forgets its carry; the job still has it.
        let done = import_finalize(
            &store,
            &jobs,
            &progress,
            &FinalizeRequest {
                job_id: init.job_id.clone(),
                circular_carry_entries: Vec::new(),
                expected: BTreeMap::from([("product_categories".to_string(), 2)]),
            },
            &opts,
        )
        .await
        .unwrap();
        assert_eq!(done.circular_restored, 1);
        assert!(done.verification[0].matched);
        let rows = store.select_page("product_categories", 0, 10).await.unwrap();
        assert_eq!(rows[0]["parent_id"], "root");

        let again = import_finalize(
            &store,
            &jobs,
            &progress,
            &FinalizeRequest {
                job_id: init.job_id,
                circular_carry_entries: Vec::new(),
                expected: BTreeMap::new(),
            },
            &opts,
        )
        .await
        .unwrap_err();
        assert!(matches!(again, ImportError::JobMismatch { .. }));
    }

    #[tokio::test]
    async fn second_init_is_refused_while_a_job_is_open() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();
        let request = InitRequest {
            meta: meta(),
            tables: vec!["brands".into()],
        };
        let opts = ImportOptions::default();
        import_init(&store, &jobs, &progress, &request, &opts, 60_000)
            .await
            .unwrap();
        let err = import_init(&store, &jobs, &progress, &request, &opts, 60_000)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::JobActive(_)));
    }

    #[tokio::test]
    async fn mismatched_protected_id_is_rejected() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();
        let opts = ImportOptions {
            protected_id: Some("admin".into()),
            ..ImportOptions::default()
        };
        let init = import_init(
            &store,
            &jobs,
            &progress,
            &InitRequest {
                meta: meta(),
                tables: vec!["auth_users".into()],
            },
            &opts,
            60_000,
        )
        .await
        .unwrap();
        assert_eq!(init.protected_id.as_deref(), Some("admin"));

        let err = import_table(
            &store,
            &jobs,
            &progress,
            &TableRequest {
                job_id: init.job_id,
                table: "auth_users".into(),
                rows: Vec::new(),
                protected_id: Some("someone-else".into()),
                tables_completed: None,
            },
            &opts,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::JobMismatch { .. }));
    }

    #[tokio::test]
    async fn bad_meta_is_rejected_before_any_wipe() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        store
            .insert_row("brands", &json!({"id": "b1", "slug": "a", "name": "A"}))
            .await
            .unwrap();
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();
        let err = import_init(
            &store,
            &jobs,
            &progress,
            &InitRequest {
                meta: json!({"format": "other"}),
                tables: vec!["brands".into()],
            },
            &ImportOptions::default(),
            60_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidSnapshot { .. }));
        assert_eq!(store.count("brands").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_calls_leave_the_tracker_in_error() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();

        let err = import_table(
            &store,
            &jobs,
            &progress,
            &TableRequest {
                job_id: "missing".into(),
                table: "brands".into(),
                rows: Vec::new(),
                protected_id: None,
                tables_completed: None,
            },
            &ImportOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::JobNotFound(_)));

        let state = progress.get();
        assert_eq!(state.phase, "error");
        assert_eq!(state.operation, Operation::Import);
        assert_eq!(state.error.as_deref(), Some("restore job missing not found"));

        let err = import_finalize(
            &store,
            &jobs,
            &progress,
            &FinalizeRequest {
                job_id: "missing".into(),
                circular_carry_entries: Vec::new(),
                expected: BTreeMap::new(),
            },
            &ImportOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::JobNotFound(_)));
        assert_eq!(progress.get().phase, "error");
    }

    #[tokio::test]
    async fn only_listed_tables_are_restored_and_only_once() {
        let pool = memory_pool().await;
        let store = SqliteRowStore::new(pool.clone());
        let jobs = JobStore::new(pool);
        let progress = ProgressTracker::new();
        let opts = ImportOptions::default();
        let init = import_init(
            &store,
            &jobs,
            &progress,
            &InitRequest {
                meta: meta(),
                tables: vec!["brands".into()],
            },
            &opts,
            60_000,
        )
        .await
        .unwrap();
        let request = |table: &str, rows: Vec<Value>| TableRequest {
            job_id: init.job_id.clone(),
            table: table.into(),
            rows,
            protected_id: None,
            tables_completed: None,
        };

        let err = import_table(
            &store,
            &jobs,
            &progress,
            &request("suppliers", vec![json!({"id": "s1", "name": "Leafy"})]),
            &opts,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::JobMismatch { .. }));
        assert_eq!(store.count("suppliers").await.unwrap(), 0);

        let brand = vec![json!({"id": "b1", "slug": "corner", "name": "Corner"})];
        let first = import_table(&store, &jobs, &progress, &request("brands", brand.clone()), &opts)
            .await
            .unwrap();
        assert_eq!((first.tables_completed, first.tables_total), (1, 1));

        let err = import_table(&store, &jobs, &progress, &request("brands", brand), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::JobMismatch { ref reason, .. } if reason.contains("already")));
        assert_eq!(store.count("brands").await.unwrap(), 1);
        assert_eq!(jobs.load(&init.job_id).await.unwrap().tables_completed(), 1);
    }
}
