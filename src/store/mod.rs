//! Row-level access to the live relational store.
//!
//! The backup core only ever talks to the database through [`RowStore`]. Every
//! call returns a `Result` that the caller inspects; nothing here panics on a
//! constraint violation or a missing table.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::AppError;

pub mod sqlite;

pub use sqlite::SqliteRowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("invalid row for {table}: {reason}")]
    InvalidRow { table: String, reason: String },
    #[error("database error on {table}: {source}")]
    Database {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to encode row for {table}: {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn database(table: &str, source: sqlx::Error) -> Self {
        StoreError::Database {
            table: table.to_string(),
            source,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database { table, source } => {
                AppError::new(AppError::STORE, format!("database error on {table}"))
                    .with_context("table", table)
                    .caused_by(AppError::from(source))
            }
            StoreError::Encode { table, source } => {
                AppError::from(source).with_context("table", table)
            }
            StoreError::UnknownTable(table) => {
                AppError::new("STORE/UNKNOWN_TABLE", format!("unknown table {table}"))
                    .with_context("table", table)
            }
            StoreError::InvalidRow { table, reason } => {
                AppError::new("STORE/INVALID_ROW", reason).with_context("table", table)
            }
        }
    }
}

/// Generic select/insert/update/delete surface over JSON rows.
///
/// Rows are JSON objects keyed by column name. Implementations must keep
/// `insert_rows` atomic: either every row of the call lands or none does.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Rows `offset..offset + limit` in a stable order.
    async fn select_page(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>, StoreError>;

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<u64, StoreError>;

    async fn insert_row(&self, table: &str, row: &Value) -> Result<(), StoreError>;

    /// Set one column of the row whose `id` equals `id`; returns rows affected.
    async fn update_column(
        &self,
        table: &str,
        id: &Value,
        column: &str,
        value: &Value,
    ) -> Result<u64, StoreError>;

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError>;

    /// Delete every row except those whose `column` equals `keep`.
    async fn delete_except(&self, table: &str, column: &str, keep: &str)
        -> Result<u64, StoreError>;

    async fn count(&self, table: &str) -> Result<u64, StoreError>;
}
