use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::import::{ImportOptions, JobStore};
use crate::progress::ProgressTracker;
use crate::store::SqliteRowStore;
use crate::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: Arc<SqliteRowStore>,
    pub jobs: Arc<JobStore>,
    pub progress: ProgressTracker,
    pub config: Arc<ServerConfig>,
    pub maintenance: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(SqliteRowStore::new(pool.clone())),
            jobs: Arc::new(JobStore::new(pool.clone())),
            pool,
            progress: ProgressTracker::new(),
            config: Arc::new(config),
            maintenance: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the single export/import slot until the guard is dropped.
    pub fn begin_maintenance(&self) -> AppResult<MaintenanceGuard> {
        MaintenanceGuard::begin(self.maintenance.clone())
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn import_options(&self, protected_id: Option<String>) -> ImportOptions {
        ImportOptions {
            batch_size: self.config.insert_batch_size,
            reset_delay: self.config.progress_reset,
            protected_id,
        }
    }
}

pub struct MaintenanceGuard {
    flag: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                AppError::BUSY,
                "Another backup or restore is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    fn state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy("sqlite::memory:")
            .expect("pool");
        AppState::new(pool, ServerConfig::from_lookup(|_| None))
    }

    #[tokio::test]
    async fn maintenance_is_single_flight() {
        let state = state();
        let guard = state.begin_maintenance().expect("first claim");
        assert!(state.maintenance_active());
        let err = state.begin_maintenance().err().expect("second claim refused");
        assert_eq!(err.code(), AppError::BUSY);
        drop(guard);
        assert!(!state.maintenance_active());
        assert!(state.begin_maintenance().is_ok());
    }

    #[tokio::test]
    async fn import_options_follow_config() {
        let state = state();
        let opts = state.import_options(Some("admin".into()));
        assert_eq!(opts.batch_size, state.config.insert_batch_size);
        assert_eq!(opts.protected_id.as_deref(), Some("admin"));
    }
}
