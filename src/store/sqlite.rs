use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};

use super::{RowStore, StoreError};
use crate::topology;

/// [`RowStore`] over the registry's tables in an SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRowStore {
    pool: SqlitePool,
}

impl SqliteRowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn resolve_table(table: &str) -> Result<&'static str, StoreError> {
    topology::known_table(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn json_extract_for_column(column: &str) -> String {
    let escaped = column.replace('\\', "\\\\");
    let escaped = escaped.replace('"', "\\\"");
    let escaped = escaped.replace('\'', "''");
    format!("json_extract(?1, '$.\"{}\"')", escaped)
}

/// Build an INSERT that binds the whole row as `?1` and projects each key.
fn insert_statement(table: &str, row: &Value) -> Result<(String, String), StoreError> {
    let object = row.as_object().ok_or_else(|| StoreError::InvalidRow {
        table: table.to_string(),
        reason: "row is not a JSON object".to_string(),
    })?;
    let payload = serde_json::to_string(object).map_err(|source| StoreError::Encode {
        table: table.to_string(),
        source,
    })?;
    if object.is_empty() {
        return Ok((
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)),
            payload,
        ));
    }
    let mut columns = Vec::with_capacity(object.len());
    let mut values = Vec::with_capacity(object.len());
    for key in object.keys() {
        columns.push(quote_ident(key));
        values.push(json_extract_for_column(key));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        values.join(", ")
    );
    Ok((sql, payload))
}

/// Convert a row to a JSON object using each value's runtime storage class.
fn row_to_json(row: &SqliteRow) -> Result<Value, sqlx::Error> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let kind = if raw.is_null() {
            "NULL".to_string()
        } else {
            raw.type_info().name().to_string()
        };
        let value = match kind.as_str() {
            "NULL" => Value::Null,
            "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
            "REAL" => {
                let float = row.try_get_unchecked::<f64, _>(index)?;
                serde_json::Number::from_f64(float)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            "BLOB" => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                Value::String(BASE64_STANDARD.encode(bytes))
            }
            _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

#[async_trait]
impl RowStore for SqliteRowStore {
    async fn select_page(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>, StoreError> {
        let table = resolve_table(table)?;
        let sql = format!(
            "SELECT * FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
            quote_ident(table)
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        rows.iter()
            .map(|row| row_to_json(row).map_err(|err| StoreError::database(table, err)))
            .collect()
    }

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<u64, StoreError> {
        let table = resolve_table(table)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::database(table, err))?;
        for row in rows {
            let (sql, payload) = insert_statement(table, row)?;
            sqlx::query(&sql)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|err| StoreError::database(table, err))?;
        }
        tx.commit()
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(rows.len() as u64)
    }

    async fn insert_row(&self, table: &str, row: &Value) -> Result<(), StoreError> {
        let table = resolve_table(table)?;
        let (sql, payload) = insert_statement(table, row)?;
        sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(())
    }

    async fn update_column(
        &self,
        table: &str,
        id: &Value,
        column: &str,
        value: &Value,
    ) -> Result<u64, StoreError> {
        let table = resolve_table(table)?;
        let sql = format!(
            "UPDATE {} SET {} = json_extract(?1, '$.value') WHERE \"id\" = json_extract(?1, '$.id')",
            quote_ident(table),
            quote_ident(column)
        );
        let payload = serde_json::to_string(&serde_json::json!({ "id": id, "value": value }))
            .map_err(|source| StoreError::Encode {
                table: table.to_string(),
                source,
            })?;
        let result = sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        let table = resolve_table(table)?;
        let sql = format!("DELETE FROM {}", quote_ident(table));
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(result.rows_affected())
    }

    async fn delete_except(
        &self,
        table: &str,
        column: &str,
        keep: &str,
    ) -> Result<u64, StoreError> {
        let table = resolve_table(table)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} IS NOT ?1",
            quote_ident(table),
            quote_ident(column)
        );
        let result = sqlx::query(&sql)
            .bind(keep)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(result.rows_affected())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let table = resolve_table(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| StoreError::database(table, err))?;
        Ok(count.max(0) as u64)
    }
}
