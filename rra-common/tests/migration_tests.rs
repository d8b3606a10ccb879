//! Forward migration of databases written by older builds

use rra_common::db::{
    get_leg, get_schema_version, init_database, introspect_table, recent_legs, LegKey, LegStatus,
    Service, Variant, CURRENT_SCHEMA_VERSION,
};
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;

async fn raw_pool(path: &Path) -> SqlitePool {
    SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_missing_columns_added_without_data_loss() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("old.sqlite");

    {
        let pool = raw_pool(&db_path).await;
        sqlx::query(
            "CREATE TABLE items (item_id TEXT PRIMARY KEY, source_name TEXT NOT NULL, \
             title TEXT, permalink TEXT NOT NULL, first_seen_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE legs (item_id TEXT NOT NULL, variant TEXT NOT NULL, service TEXT NOT NULL, \
             status TEXT NOT NULL, submitted_at INTEGER, archive_url TEXT, last_check_at INTEGER, \
             check_count INTEGER NOT NULL DEFAULT 0, error_message TEXT, created_at INTEGER NOT NULL, \
             PRIMARY KEY (item_id, variant, service))",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO items VALUES ('abc123', 'rust', 'Hello', \
             'https://www.reddit.com/r/rust/comments/abc123/hello', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO legs VALUES ('abc123', 'primary', 'wayback', 'awaiting_verification', \
             1, 'https://web.archive.org/web/1/x', 70, 1, NULL, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();

    let columns: Vec<String> = introspect_table(&pool, "legs")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    for name in ["last_check_error", "snapshot_at", "updated_at"] {
        assert!(columns.contains(&name.to_string()), "column {} not added", name);
    }

    let key = LegKey::new("abc123", Variant::Primary, Service::Wayback);
    let leg = get_leg(&pool, &key).await.unwrap().unwrap();
    assert_eq!(leg.leg.status, LegStatus::AwaitingVerification);
    assert_eq!(leg.leg.check_count, 1);
    assert_eq!(leg.leg.snapshot_at, None);
    assert_eq!(leg.item.title, "Hello");

    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_legacy_posts_table_imported() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("legacy.sqlite");

    {
        let pool = raw_pool(&db_path).await;
        sqlx::query(
            r#"
            CREATE TABLE posts (
              reddit_id TEXT PRIMARY KEY,
              subreddit TEXT NOT NULL,
              created_utc INTEGER,
              title TEXT,
              reddit_url TEXT,
              url_www TEXT NOT NULL,
              url_old TEXT NOT NULL,
              wayback_www TEXT,
              wayback_old TEXT,
              wayback_www_ts TEXT,
              wayback_old_ts TEXT,
              wayback_www_status TEXT,
              wayback_old_status TEXT,
              wayback_www_submit_ts TEXT,
              wayback_old_submit_ts TEXT,
              wayback_www_ok INTEGER,
              wayback_old_ok INTEGER,
              wayback_www_checked_at TEXT,
              wayback_old_checked_at TEXT,
              atoday_www TEXT,
              atoday_old TEXT,
              atoday_www_ok INTEGER,
              atoday_old_ok INTEGER,
              atoday_www_checked_at TEXT,
              atoday_old_checked_at TEXT,
              err_wayback_www TEXT,
              err_wayback_old TEXT,
              err_atoday_www TEXT,
              err_atoday_old TEXT,
              err_wayback_avail_www TEXT,
              err_wayback_avail_old TEXT,
              inserted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO posts (
              reddit_id, subreddit, created_utc, title, reddit_url, url_www, url_old, inserted_at,
              wayback_www, wayback_www_submit_ts, wayback_www_ok, wayback_www_checked_at, wayback_www_ts,
              wayback_old_submit_ts, wayback_old_ok, wayback_old_checked_at, err_wayback_avail_old,
              atoday_old, atoday_old_ok, atoday_old_checked_at,
              atoday_www_ok, atoday_www_checked_at, err_atoday_www
            ) VALUES (
              'abc123', 'rust', 1704067200, 'Hello',
              'https://www.reddit.com/r/rust/comments/abc123/hello',
              'https://www.reddit.com/r/rust/comments/abc123/hello',
              'https://old.reddit.com/r/rust/comments/abc123/hello',
              '2024-01-01T00:00:00+00:00',
              'https://web.archive.org/web/20240101000010/x', '20240101000010', 1,
              '2024-01-01T00:20:00+00:00', '20240101000015',
              '20240101000011', 0, '2024-01-01T00:20:05+00:00', 'HTTP 503',
              'https://archive.ph/AbCd1', 1, '2024-01-01T00:00:30+00:00',
              0, '2024-01-01T00:00:20+00:00', 'blocked (captcha/Cloudflare)'
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();

    let legs = recent_legs(&pool, 10).await.unwrap();
    assert_eq!(legs.len(), 4, "every leg with recorded activity is imported");

    let wayback = get_leg(&pool, &LegKey::new("abc123", Variant::Primary, Service::Wayback))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wayback.leg.status, LegStatus::VerifiedOk);
    assert_eq!(wayback.item.source_name, "rust");

    let best_effort = get_leg(
        &pool,
        &LegKey::new("abc123", Variant::Alternate, Service::ArchiveToday),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(best_effort.leg.status, LegStatus::Submitted);
    assert_eq!(best_effort.leg.archive_url.as_deref(), Some("https://archive.ph/AbCd1"));

    let pending = get_leg(&pool, &LegKey::new("abc123", Variant::Alternate, Service::Wayback))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.leg.status, LegStatus::AwaitingVerification);
    assert_eq!(pending.leg.check_count, 1);
    assert_eq!(pending.leg.last_check_error.as_deref(), Some("HTTP 503"));

    let blocked = get_leg(
        &pool,
        &LegKey::new("abc123", Variant::Primary, Service::ArchiveToday),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(blocked.leg.status, LegStatus::Error);
    assert_eq!(
        blocked.leg.error_message.as_deref(),
        Some("blocked (captcha/Cloudflare)")
    );
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("twice.sqlite");

    let first = init_database(&db_path).await.unwrap();
    first.close().await;
    let second = init_database(&db_path).await.unwrap();
    assert_eq!(get_schema_version(&second).await.unwrap(), CURRENT_SCHEMA_VERSION);
}
