//! Item queries

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::models::Item;
use crate::db::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use crate::time::{from_epoch, to_epoch};
use crate::Result;

/// Insert an item unless its `item_id` is already known
///
/// Returns `true` only for a first sighting. Rediscovery leaves the stored
/// row (including `first_seen_at`) untouched.
pub async fn upsert_item(pool: &SqlitePool, item: &Item) -> Result<bool> {
    retry_on_lock("upsert item", DEFAULT_MAX_LOCK_WAIT, || async move {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items (item_id, source_name, title, permalink, published_at, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.item_id)
        .bind(&item.source_name)
        .bind(&item.title)
        .bind(&item.permalink)
        .bind(item.published_at.map(to_epoch))
        .bind(to_epoch(item.first_seen_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Load an item by id
pub async fn get_item(pool: &SqlitePool, item_id: &str) -> Result<Option<Item>> {
    let row = sqlx::query(
        r#"
        SELECT item_id, source_name, title, permalink, published_at, first_seen_at
        FROM items
        WHERE item_id = ?
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| item_from_row(&r, "")).transpose()
}

/// Number of stored items
pub async fn count_items(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Map an item row; `prefix` selects aliased columns in joined queries
pub(crate) fn item_from_row(row: &SqliteRow, prefix: &str) -> Result<Item> {
    let col = |name: &str| format!("{}{}", prefix, name);

    Ok(Item {
        item_id: row.try_get(col("item_id").as_str())?,
        source_name: row.try_get(col("source_name").as_str())?,
        title: row
            .try_get::<Option<String>, _>(col("title").as_str())?
            .unwrap_or_default(),
        permalink: row.try_get(col("permalink").as_str())?,
        published_at: row
            .try_get::<Option<i64>, _>(col("published_at").as_str())?
            .map(from_epoch)
            .transpose()?,
        first_seen_at: from_epoch(row.try_get(col("first_seen_at").as_str())?)?,
    })
}
