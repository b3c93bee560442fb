use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "RETAIL_VAULT_LOG";
pub const LOG_DIR_ENV: &str = "RETAIL_VAULT_LOG_DIR";
pub const DEFAULT_FILTER: &str = "retail_vault=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "retail-vault.log";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_new(
        std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into()),
    )
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install JSON logging on stderr, plus a daily-rolling file when
/// `RETAIL_VAULT_LOG_DIR` is set. The returned guard flushes the file writer
/// on drop and must outlive the program's work.
pub fn init() -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::builder()
        .with_max_level(log::LevelFilter::Info)
        .init();

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            std::fs::create_dir_all(&dir).with_context(|| {
                format!("create log directory {}", std::path::Path::new(&dir).display())
            })?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(guard)
}
