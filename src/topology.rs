//! Static table topology for snapshot export and restore.
//!
//! Tables are grouped into dependency levels: a table may only hold foreign keys
//! into tables of an earlier level. Flattening the levels in order gives a valid
//! insertion order; walking it backwards gives a valid deletion order. References
//! that cannot be expressed that way are declared as [`CircularFk`] entries and are
//! nulled before insert, then replayed once every row exists.

use once_cell::sync::Lazy;

pub const TABLE_LEVELS: &[&[&str]] = &[
    &[
        "brands",
        "store_settings",
        "auth_users",
        "product_categories",
        "suppliers",
        "whatsapp_templates",
    ],
    &["branches", "auth_accounts", "auth_sessions", "products"],
    &["user_profiles", "customers", "product_variants"],
    &[
        "user_permissions",
        "inventory",
        "carts",
        "whatsapp_conversations",
    ],
    &["orders", "cart_items", "whatsapp_messages"],
    &["order_items", "payments", "inventory_movements"],
];

/// A foreign key that is stripped before insert and restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularFk {
    pub table: &'static str,
    pub column: &'static str,
    pub referenced_table: &'static str,
}

/// Every column listed here must be nullable in the schema.
pub const CIRCULAR_FKS: &[CircularFk] = &[
    CircularFk {
        table: "branches",
        column: "manager_id",
        referenced_table: "user_profiles",
    },
    CircularFk {
        table: "user_profiles",
        column: "branch_id",
        referenced_table: "branches",
    },
    CircularFk {
        table: "product_categories",
        column: "parent_id",
        referenced_table: "product_categories",
    },
    CircularFk {
        table: "customers",
        column: "referred_by",
        referenced_table: "customers",
    },
];

pub const MESSAGING_TABLES: &[&str] = &[
    "whatsapp_templates",
    "whatsapp_conversations",
    "whatsapp_messages",
];

pub const SESSION_TABLES: &[&str] = &["auth_sessions"];

/// How the acting administrator's own rows are recognised in one identity table.
///
/// `bulk_filter_key` and `incremental_filter_key` differ for `user_profiles`: the
/// single-shot restore matches the profile's primary key while the per-table restore
/// matches its `user_id` column. Both paths are kept as declared until the schema
/// owner confirms which column is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedRule {
    pub table: &'static str,
    pub delete_key: &'static str,
    pub bulk_filter_key: &'static str,
    pub incremental_filter_key: &'static str,
}

pub const PROTECTED_RULES: &[ProtectedRule] = &[
    ProtectedRule {
        table: "auth_users",
        delete_key: "id",
        bulk_filter_key: "id",
        incremental_filter_key: "id",
    },
    ProtectedRule {
        table: "user_profiles",
        delete_key: "id",
        bulk_filter_key: "id",
        incremental_filter_key: "user_id",
    },
    ProtectedRule {
        table: "auth_accounts",
        delete_key: "user_id",
        bulk_filter_key: "user_id",
        incremental_filter_key: "user_id",
    },
    ProtectedRule {
        table: "auth_sessions",
        delete_key: "user_id",
        bulk_filter_key: "user_id",
        incremental_filter_key: "user_id",
    },
];

static FULL_ORDER: Lazy<Vec<&'static str>> =
    Lazy::new(|| TABLE_LEVELS.iter().flat_map(|level| level.iter().copied()).collect());

/// Level-ordered list of every known table.
pub fn full_table_order() -> &'static [&'static str] {
    FULL_ORDER.as_slice()
}

pub fn is_known_table(table: &str) -> bool {
    FULL_ORDER.iter().any(|known| *known == table)
}

/// Resolve a caller-supplied name to the registry's static name.
pub fn known_table(table: &str) -> Option<&'static str> {
    FULL_ORDER.iter().copied().find(|known| *known == table)
}

pub fn level_of(table: &str) -> Option<usize> {
    TABLE_LEVELS
        .iter()
        .position(|level| level.iter().any(|known| *known == table))
}

pub fn circular_fks_for(table: &str) -> impl Iterator<Item = &'static CircularFk> + '_ {
    CIRCULAR_FKS.iter().filter(move |fk| fk.table == table)
}

pub fn protected_rule_for(table: &str) -> Option<&'static ProtectedRule> {
    PROTECTED_RULES.iter().find(|rule| rule.table == table)
}

/// Optional table categories an export may leave out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSelection {
    pub include_messaging: bool,
    pub include_sessions: bool,
}

impl Default for ExportSelection {
    fn default() -> Self {
        Self {
            include_messaging: true,
            include_sessions: false,
        }
    }
}

impl ExportSelection {
    pub fn includes(&self, table: &str) -> bool {
        if !self.include_messaging && MESSAGING_TABLES.contains(&table) {
            return false;
        }
        if !self.include_sessions && SESSION_TABLES.contains(&table) {
            return false;
        }
        true
    }

    pub fn tables(&self) -> Vec<&'static str> {
        full_table_order()
            .iter()
            .copied()
            .filter(|table| self.includes(table))
            .collect()
    }
}
