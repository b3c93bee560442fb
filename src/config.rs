use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::export::DEFAULT_PAGE_SIZE;
use crate::import::DEFAULT_BATCH_SIZE;

pub const DB_ENV: &str = "RETAIL_VAULT_DB";
pub const BIND_ENV: &str = "RETAIL_VAULT_BIND";
pub const EXPORT_PAGE_SIZE_ENV: &str = "RETAIL_VAULT_EXPORT_PAGE_SIZE";
pub const INSERT_BATCH_ENV: &str = "RETAIL_VAULT_INSERT_BATCH";
pub const PROGRESS_RESET_MS_ENV: &str = "RETAIL_VAULT_PROGRESS_RESET_MS";
pub const MAX_UPLOAD_BYTES_ENV: &str = "RETAIL_VAULT_MAX_UPLOAD_BYTES";
pub const JOB_TTL_SECS_ENV: &str = "RETAIL_VAULT_JOB_TTL_SECS";
pub const REPORTS_DIR_ENV: &str = "RETAIL_VAULT_REPORTS_DIR";

const APP_DIR: &str = "retail-vault";
const DEFAULT_BIND: &str = "127.0.0.1:8787";
const MAX_PAGE_SIZE: u64 = 10_000;
const MAX_BATCH_SIZE: u64 = 5_000;
const DEFAULT_PROGRESS_RESET_MS: u64 = 5_000;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_JOB_TTL_SECS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub export_page_size: u64,
    pub insert_batch_size: usize,
    pub progress_reset: Duration,
    pub max_upload_bytes: usize,
    pub job_ttl: Duration,
    pub reports_dir: PathBuf,
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Positive integer from `key`, clamped to `max`; anything else gives `default`.
fn bounded(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64, max: u64) -> u64 {
    match non_empty(lookup, key).map(|raw| raw.parse::<u64>()) {
        Some(Ok(value)) if value > 0 => value.min(max),
        Some(_) => {
            tracing::warn!(
                target: "retail_vault",
                event = "config_value_ignored",
                key,
                "invalid value; using default"
            );
            default
        }
        None => default,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let root = data_root();
        let db_path = non_empty(&lookup, DB_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("retail.sqlite3"));
        let reports_dir = non_empty(&lookup, REPORTS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("reports"));
        let bind = match non_empty(&lookup, BIND_ENV).map(|raw| raw.parse::<SocketAddr>()) {
            Some(Ok(addr)) => addr,
            Some(Err(err)) => {
                tracing::warn!(
                    target: "retail_vault",
                    event = "config_value_ignored",
                    key = BIND_ENV,
                    error = %err
                );
                default_bind()
            }
            None => default_bind(),
        };

        Self {
            db_path,
            bind,
            export_page_size: bounded(&lookup, EXPORT_PAGE_SIZE_ENV, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE),
            insert_batch_size: bounded(
                &lookup,
                INSERT_BATCH_ENV,
                DEFAULT_BATCH_SIZE as u64,
                MAX_BATCH_SIZE,
            ) as usize,
            progress_reset: Duration::from_millis(bounded(
                &lookup,
                PROGRESS_RESET_MS_ENV,
                DEFAULT_PROGRESS_RESET_MS,
                600_000,
            )),
            max_upload_bytes: bounded(
                &lookup,
                MAX_UPLOAD_BYTES_ENV,
                DEFAULT_MAX_UPLOAD_BYTES,
                4 * 1024 * 1024 * 1024,
            ) as usize,
            job_ttl: Duration::from_secs(bounded(
                &lookup,
                JOB_TTL_SECS_ENV,
                DEFAULT_JOB_TTL_SECS,
                7 * 24 * 3_600,
            )),
            reports_dir,
        }
    }
}

fn default_bind() -> SocketAddr {
    DEFAULT_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)))
}
