#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use retail_vault_lib::migrate::apply_migrations;
use retail_vault_lib::store::{RowStore, SqliteRowStore, StoreError};

/// Fresh in-memory database with the retail schema applied and foreign keys on.
pub async fn memory_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("connect sqlite::memory:");
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

async fn exec(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql)
        .execute(pool)
        .await
        .unwrap_or_else(|err| panic!("{sql}: {err}"));
}

/// A small shop: two staff members, one branch managed by the admin, a
/// category tree, three customers with a referral chain, and one paid order.
pub async fn seed_shop(pool: &SqlitePool) {
    for sql in [
        "INSERT INTO brands (id, slug, name) VALUES ('b1', 'corner', 'Corner Shop')",
        "INSERT INTO store_settings (id, key, value) VALUES ('s1', 'currency', 'EUR')",
        "INSERT INTO auth_users (id, email) VALUES ('admin', 'admin@example.com')",
        "INSERT INTO auth_users (id, email) VALUES ('clerk', 'clerk@example.com')",
        "INSERT INTO auth_accounts (id, user_id, provider, provider_account_id) \
         VALUES ('acc1', 'admin', 'password', 'admin')",
        "INSERT INTO user_profiles (id, user_id, full_name, role) \
         VALUES ('admin', 'admin', 'Ada Admin', 'admin')",
        "INSERT INTO user_profiles (id, user_id, full_name, role) \
         VALUES ('clerk', 'clerk', 'Cal Clerk', 'staff')",
        "INSERT INTO branches (id, brand_id, name, manager_id) \
         VALUES ('br1', 'b1', 'High Street', 'admin')",
        "UPDATE user_profiles SET branch_id = 'br1'",
        "INSERT INTO user_permissions (id, user_id, permission) \
         VALUES ('perm1', 'clerk', 'pos.sell')",
        "INSERT INTO product_categories (id, name) VALUES ('cat-root', 'Drinks')",
        "INSERT INTO product_categories (id, name, parent_id) \
         VALUES ('cat-tea', 'Tea', 'cat-root')",
        "INSERT INTO suppliers (id, name) VALUES ('sup1', 'Leafy Imports')",
        "INSERT INTO products (id, brand_id, category_id, supplier_id, name, price) \
         VALUES ('p1', 'b1', 'cat-tea', 'sup1', 'Green Tea', 4.5)",
        "INSERT INTO products (id, brand_id, category_id, supplier_id, name, price) \
         VALUES ('p2', 'b1', 'cat-tea', 'sup1', 'Black Tea', 3.75)",
        "INSERT INTO product_variants (id, product_id, label, price) \
         VALUES ('v1', 'p1', '100g', 4.5)",
        "INSERT INTO inventory (id, branch_id, variant_id, quantity) \
         VALUES ('inv1', 'br1', 'v1', 12)",
        "INSERT INTO customers (id, brand_id, name) VALUES ('c1', 'b1', 'Alice')",
        "INSERT INTO customers (id, brand_id, name, referred_by) \
         VALUES ('c2', 'b1', 'Bob', 'c1')",
        "INSERT INTO customers (id, brand_id, name, referred_by) \
         VALUES ('c3', 'b1', 'Carol', 'c2')",
        "INSERT INTO orders (id, customer_id, branch_id, created_by, total, status) \
         VALUES ('o1', 'c1', 'br1', 'clerk', 9.0, 'paid')",
        "INSERT INTO order_items (id, order_id, variant_id, quantity, unit_price) \
         VALUES ('oi1', 'o1', 'v1', 2, 4.5)",
        "INSERT INTO payments (id, order_id, method, amount) VALUES ('pay1', 'o1', 'cash', 9.0)",
        "INSERT INTO inventory_movements (id, inventory_id, order_id, delta, reason) \
         VALUES ('mv1', 'inv1', 'o1', -2, 'sale')",
        "INSERT INTO whatsapp_templates (id, name, body) VALUES ('t1', 'receipt', 'Thanks!')",
        "INSERT INTO whatsapp_conversations (id, customer_id, branch_id, wa_phone) \
         VALUES ('conv1', 'c1', 'br1', '+3531234567')",
        "INSERT INTO whatsapp_messages (id, conversation_id, direction, body) \
         VALUES ('m1', 'conv1', 'out', 'Thanks!')",
    ] {
        exec(pool, sql).await;
    }
}

/// An administrator that only exists in the target database.
pub async fn seed_admin(pool: &SqlitePool, id: &str) {
    sqlx::query("INSERT INTO auth_users (id, email) VALUES (?1, ?1 || '@example.com')")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO user_profiles (id, user_id, full_name, role) VALUES (?1, ?1, 'Owner', 'admin')",
    )
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn column(pool: &SqlitePool, table: &str, column: &str, id: &str) -> Option<String> {
    sqlx::query_scalar(&format!("SELECT \"{column}\" FROM \"{table}\" WHERE id = ?1"))
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Wraps a store and records every delete and insert as `"delete:<table>"`
/// or `"insert:<table>"`.
pub struct RecordingStore {
    inner: SqliteRowStore,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteRowStore::new(pool),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, op: &str, table: &str) {
        self.log.lock().unwrap().push(format!("{op}:{table}"));
    }

    /// Position of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|logged| logged == entry)
            .unwrap_or_else(|| panic!("{entry} was never recorded"))
    }
}

#[async_trait]
impl RowStore for RecordingStore {
    async fn select_page(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>, StoreError> {
        self.inner.select_page(table, offset, limit).await
    }

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<u64, StoreError> {
        self.record("insert", table);
        self.inner.insert_rows(table, rows).await
    }

    async fn insert_row(&self, table: &str, row: &Value) -> Result<(), StoreError> {
        self.record("insert", table);
        self.inner.insert_row(table, row).await
    }

    async fn update_column(
        &self,
        table: &str,
        id: &Value,
        column: &str,
        value: &Value,
    ) -> Result<u64, StoreError> {
        self.inner.update_column(table, id, column, value).await
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        self.record("delete", table);
        self.inner.delete_all(table).await
    }

    async fn delete_except(
        &self,
        table: &str,
        column: &str,
        keep: &str,
    ) -> Result<u64, StoreError> {
        self.record("delete", table);
        self.inner.delete_except(table, column, keep).await
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        self.inner.count(table).await
    }
}
