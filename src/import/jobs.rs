//! Persisted cursor for the per-table restore.
//!
//! Each call of the per-table restore names a job id; the job row carries the
//! protected identity, the completed-table counter and the accumulated carry so
//! a restore can be resumed without trusting the caller to hold that state.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::{merge_carry, CarryEntry, ImportError};
use crate::time::now_ms;

pub const PHASE_INSERTING: &str = "inserting";
pub const PHASE_DONE: &str = "done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RestoreJob {
    pub id: String,
    pub protected_id: Option<String>,
    /// Tables wiped at init, in insertion order. Only these may be restored.
    pub tables: Vec<String>,
    /// Tables already restored, in call order.
    pub completed: Vec<String>,
    pub phase: String,
    pub carry: Vec<CarryEntry>,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

impl RestoreJob {
    pub fn is_finished(&self) -> bool {
        self.phase == PHASE_DONE
    }

    pub fn tables_total(&self) -> u32 {
        self.tables.len() as u32
    }

    pub fn tables_completed(&self) -> u32 {
        self.completed.len() as u32
    }

    /// Reject a table the job never wiped, or one it already restored.
    pub fn check_table(&self, table: &str) -> Result<(), ImportError> {
        let reason = if !self.tables.iter().any(|name| name == table) {
            format!("table {table} is not part of this restore job")
        } else if self.completed.iter().any(|name| name == table) {
            format!("table {table} was already restored")
        } else {
            return Ok(());
        };
        Err(ImportError::JobMismatch {
            job: self.id.clone(),
            reason,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

fn job_from_row(row: &SqliteRow) -> Result<RestoreJob, ImportError> {
    let tables: String = row.try_get("tables")?;
    let completed: String = row.try_get("completed")?;
    let carry: String = row.try_get("carry")?;
    Ok(RestoreJob {
        id: row.try_get("id")?,
        protected_id: row.try_get("protected_id")?,
        tables: serde_json::from_str(&tables)?,
        completed: serde_json::from_str(&completed)?,
        phase: row.try_get("phase")?,
        carry: serde_json::from_str(&carry)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_JOB: &str = "SELECT id, protected_id, tables, completed, phase, carry, \
     created_at, updated_at FROM restore_jobs";

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        protected_id: Option<&str>,
        tables: &[&str],
    ) -> Result<RestoreJob, ImportError> {
        let now = now_ms();
        let job = RestoreJob {
            id: Uuid::now_v7().to_string(),
            protected_id: protected_id.map(str::to_string),
            tables: tables.iter().map(|table| table.to_string()).collect(),
            completed: Vec::new(),
            phase: PHASE_INSERTING.to_string(),
            carry: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO restore_jobs (id, protected_id, tables, completed, phase, carry, created_at, updated_at) \
             VALUES (?1, ?2, ?3, '[]', ?4, '[]', ?5, ?5)",
        )
        .bind(&job.id)
        .bind(&job.protected_id)
        .bind(serde_json::to_string(&job.tables)?)
        .bind(&job.phase)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn load(&self, id: &str) -> Result<RestoreJob, ImportError> {
        let sql = format!("{SELECT_JOB} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ImportError::JobNotFound(id.to_string()))?;
        job_from_row(&row)
    }

    /// Most recent unfinished job touched within `ttl_ms`.
    pub async fn active(&self, ttl_ms: i64) -> Result<Option<RestoreJob>, ImportError> {
        let sql = format!(
            "{SELECT_JOB} WHERE phase != ?1 AND updated_at > ?2 ORDER BY updated_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(PHASE_DONE)
            .bind(now_ms() - ttl_ms)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Mark `table` restored and fold its carry into the job.
    pub async fn record_table(
        &self,
        id: &str,
        table: &str,
        carry: Vec<CarryEntry>,
    ) -> Result<RestoreJob, ImportError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("{SELECT_JOB} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ImportError::JobNotFound(id.to_string()))?;
        let mut job = job_from_row(&row)?;
        job.check_table(table)?;
        job.completed.push(table.to_string());
        merge_carry(&mut job.carry, carry);
        job.updated_at = now_ms();
        sqlx::query(
            "UPDATE restore_jobs SET completed = ?1, carry = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(serde_json::to_string(&job.completed)?)
        .bind(serde_json::to_string(&job.carry)?)
        .bind(job.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    pub async fn set_phase(&self, id: &str, phase: &str) -> Result<(), ImportError> {
        let result = sqlx::query("UPDATE restore_jobs SET phase = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(phase)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ImportError::JobNotFound(id.to_string()));
        }
        Ok(())
    }
}
