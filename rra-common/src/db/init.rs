//! Database initialization
//!
//! Opening a store file runs three idempotent phases:
//! 1. `CREATE TABLE IF NOT EXISTS` for every table
//! 2. Schema sync adds columns missing from older files
//! 3. Versioned migrations
//!
//! Re-running initialization against an existing file never drops rows.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::{Error, Result};

/// SQLite busy timeout applied to every connection
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) the store and bring its schema up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_items_table(&pool).await?;
    create_legs_table(&pool).await?;

    crate::db::table_schemas::sync_all_table_schemas(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Open an existing store for reading only
///
/// Used by the HTTP read surface; the archiver keeps writing through its own
/// pool while this one observes committed state.
pub async fn connect_readonly(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.exists() {
        return Err(Error::NotFound(format!(
            "Database not found: {} (run the archiver once to create it)",
            db_path.display()
        )));
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            item_id TEXT PRIMARY KEY,
            source_name TEXT NOT NULL DEFAULT '',
            title TEXT,
            permalink TEXT NOT NULL DEFAULT '',
            published_at INTEGER,
            first_seen_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_legs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legs (
            item_id TEXT NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
            variant TEXT NOT NULL CHECK (variant IN ('primary', 'alternate')),
            service TEXT NOT NULL CHECK (service IN ('wayback', 'archive_today')),
            status TEXT NOT NULL DEFAULT 'unsubmitted',
            submitted_at INTEGER,
            archive_url TEXT,
            last_check_at INTEGER,
            check_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            last_check_error TEXT,
            snapshot_at INTEGER,
            created_at INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (item_id, variant, service)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_parent_directory_and_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/archive.sqlite");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        for table in ["items", "legs", "schema_version"] {
            assert!(
                crate::db::schema_sync::table_exists(&pool, table).await.unwrap(),
                "missing table {}",
                table
            );
        }
    }

    #[tokio::test]
    async fn test_readonly_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("archive.sqlite");
        init_database(&db_path).await.unwrap();

        let pool = connect_readonly(&db_path).await.unwrap();
        let result = sqlx::query("CREATE TABLE _test_write (id INTEGER)")
            .execute(&pool)
            .await;
        assert!(result.is_err(), "write through read-only pool should fail");
    }

    #[tokio::test]
    async fn test_readonly_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = connect_readonly(&temp_dir.path().join("absent.sqlite"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
