//! Table schema definitions
//!
//! Single source of truth for the columns of every table. `CREATE TABLE`
//! statements in `init.rs` create fresh databases; these lists bring older
//! databases forward.

use sqlx::SqlitePool;
use tracing::info;

use crate::db::schema_sync::{sync_table, ColumnDefinition, TableSchema};
use crate::Result;

/// `items` table: one row per discovered feed entry
pub struct ItemsTableSchema;

impl TableSchema for ItemsTableSchema {
    fn table_name() -> &'static str {
        "items"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("item_id", "TEXT").primary_key(),
            ColumnDefinition::new("source_name", "TEXT").not_null().default("''"),
            ColumnDefinition::new("title", "TEXT"),
            ColumnDefinition::new("permalink", "TEXT").not_null().default("''"),
            ColumnDefinition::new("published_at", "INTEGER"),
            ColumnDefinition::new("first_seen_at", "INTEGER").not_null().default("0"),
        ]
    }
}

/// `legs` table: one row per (item, variant, service)
pub struct LegsTableSchema;

impl TableSchema for LegsTableSchema {
    fn table_name() -> &'static str {
        "legs"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("item_id", "TEXT").not_null(),
            ColumnDefinition::new("variant", "TEXT").not_null(),
            ColumnDefinition::new("service", "TEXT").not_null(),
            ColumnDefinition::new("status", "TEXT").not_null().default("'unsubmitted'"),
            ColumnDefinition::new("submitted_at", "INTEGER"),
            ColumnDefinition::new("archive_url", "TEXT"),
            ColumnDefinition::new("last_check_at", "INTEGER"),
            ColumnDefinition::new("check_count", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("error_message", "TEXT"),
            ColumnDefinition::new("last_check_error", "TEXT"),
            ColumnDefinition::new("snapshot_at", "INTEGER"),
            ColumnDefinition::new("created_at", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("updated_at", "INTEGER").not_null().default("0"),
        ]
    }
}

/// Synchronize all table schemas (phase 2 of initialization)
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<()> {
    let added = sync_table::<ItemsTableSchema>(pool).await?
        + sync_table::<LegsTableSchema>(pool).await?;

    if added > 0 {
        info!("Schema sync added {} column(s)", added);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_schema_has_diagnostic_columns() {
        let columns = LegsTableSchema::expected_columns();
        for name in ["last_check_error", "snapshot_at", "check_count", "error_message"] {
            assert!(columns.iter().any(|c| c.name == name), "missing {}", name);
        }
    }

    #[test]
    fn test_items_schema_primary_key() {
        let columns = ItemsTableSchema::expected_columns();
        assert!(columns.iter().any(|c| c.name == "item_id" && c.primary_key));
    }
}
