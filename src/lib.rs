use std::path::Path;

use anyhow::Context;
use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::state::AppState;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod routes;
pub mod state;
pub mod store;
pub mod time;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{AppError, AppResult};

/// Open the store at `db_path` and bring its schema up to date.
pub async fn open_database(db_path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = db::open_sqlite_pool(db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(pool)
}

/// Serve the backup API until ctrl-c.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let pool = open_database(&config.db_path).await?;
    let bind = config.bind;
    let app = routes::router(AppState::new(pool.clone(), config));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(target: "retail_vault", event = "server_listening", addr = %bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "retail_vault", event = "server_shutdown");
        })
        .await
        .context("serve http")?;
    pool.close().await;
    Ok(())
}
