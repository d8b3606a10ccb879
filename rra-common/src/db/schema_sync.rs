//! Automatic schema synchronization
//!
//! Each table declares its expected columns in code. On startup the declared
//! list is compared with `PRAGMA table_info` and any missing column is added
//! with `ALTER TABLE ADD COLUMN`, so databases written by older builds gain new
//! columns without losing rows.
//!
//! Initialization runs in three phases:
//! 1. `CREATE TABLE IF NOT EXISTS` for every table
//! 2. Column sync (this module)
//! 3. Versioned migrations (`migrations.rs`)

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::Result;

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (`TEXT`, `INTEGER`, ...)
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// `ALTER TABLE ... ADD COLUMN` statement for this column
    ///
    /// SQLite cannot add a PRIMARY KEY column, and a NOT NULL column only
    /// when a default is supplied; those constraints are dropped with a warning.
    fn add_column_sql(&self, table: &str) -> String {
        let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, self.name, self.sql_type);

        if self.primary_key {
            warn!(
                "Cannot add PRIMARY KEY column {}.{} via ALTER TABLE; adding without the constraint",
                table, self.name
            );
        }

        match (&self.default_value, self.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Cannot add NOT NULL column {}.{} without a DEFAULT; column will be nullable",
                table, self.name
            ),
            (None, false) => {}
        }

        sql
    }
}

/// Declared schema of one table
pub trait TableSchema {
    fn table_name() -> &'static str;

    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Column as reported by `PRAGMA table_info`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub name: String,
    pub type_name: String,
}

/// Read the live column list of a table
pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table_name))
        .fetch_all(pool)
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(ActualColumn {
            name: row.try_get("name")?,
            type_name: row.try_get("type")?,
        });
    }
    Ok(columns)
}

pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
    )
    .bind(table_name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Declared columns absent from the live table
pub fn missing_columns(expected: &[ColumnDefinition], actual: &[ActualColumn]) -> Vec<ColumnDefinition> {
    expected
        .iter()
        .filter(|col| !actual.iter().any(|a| a.name.eq_ignore_ascii_case(&col.name)))
        .cloned()
        .collect()
}

/// Add every missing declared column; returns how many were added
///
/// Type changes and constraint changes are out of reach for `ALTER TABLE`
/// in SQLite and are only reported.
pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
    let table = T::table_name();

    if !table_exists(pool, table).await? {
        warn!("Schema sync: table '{}' does not exist yet", table);
        return Ok(0);
    }

    let expected = T::expected_columns();
    let actual = introspect_table(pool, table).await?;

    for col in &expected {
        if let Some(live) = actual.iter().find(|a| a.name.eq_ignore_ascii_case(&col.name)) {
            if !live.type_name.eq_ignore_ascii_case(&col.sql_type) {
                warn!(
                    "Type mismatch in {}.{}: expected '{}', found '{}' (manual migration required)",
                    table, col.name, col.sql_type, live.type_name
                );
            }
        }
    }

    let missing = missing_columns(&expected, &actual);
    let mut added = 0;
    for col in &missing {
        match sqlx::query(&col.add_column_sql(table)).execute(pool).await {
            Ok(_) => {
                info!("Schema sync: added column {}.{} ({})", table, col.name, col.sql_type);
                added += 1;
            }
            // Another process added it between introspection and ALTER
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {}
            Err(e) => return Err(e.into()),
        }
    }

    if added == 0 {
        info!("Schema sync: '{}' up to date", table);
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_case_insensitive() {
        let expected = vec![
            ColumnDefinition::new("item_id", "TEXT").primary_key(),
            ColumnDefinition::new("snapshot_at", "INTEGER"),
        ];
        let actual = vec![ActualColumn {
            name: "ITEM_ID".to_string(),
            type_name: "TEXT".to_string(),
        }];
        let missing = missing_columns(&expected, &actual);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "snapshot_at");
    }

    #[test]
    fn test_add_column_sql_with_default() {
        let col = ColumnDefinition::new("check_count", "INTEGER").not_null().default("0");
        assert_eq!(
            col.add_column_sql("legs"),
            "ALTER TABLE legs ADD COLUMN check_count INTEGER NOT NULL DEFAULT 0"
        );
    }

    #[test]
    fn test_add_column_sql_drops_not_null_without_default() {
        let col = ColumnDefinition::new("status", "TEXT").not_null();
        assert_eq!(col.add_column_sql("legs"), "ALTER TABLE legs ADD COLUMN status TEXT");
    }
}
