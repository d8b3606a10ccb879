//! Versioned schema migrations
//!
//! Column additions are handled by schema sync; this module covers changes
//! that need more than `ALTER TABLE ADD COLUMN`. Migrations are idempotent
//! and never modified once released; new changes get a new version.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::db::models::{LegStatus, Service, Variant};
use crate::time::{parse_ts14, to_epoch};
use crate::Result;

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Latest recorded schema version, 0 when none
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(version)
        .bind(to_epoch(Utc::now()))
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({}); proceeding without migrating",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: selection indexes for the dispatcher and the verifier
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_legs_status_service ON legs(status, service)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_first_seen ON items(first_seen_at)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Migration v2: import the legacy single-table `posts` layout
///
/// Older databases kept one wide row per post with per-view Wayback and
/// archive.today columns. Each post becomes an item plus up to four legs.
/// Existing items and legs are left untouched (`INSERT OR IGNORE`), and the
/// legacy table is kept as history.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !crate::db::schema_sync::table_exists(pool, "posts").await? {
        info!("  No legacy posts table - skipping import");
        return Ok(());
    }

    let columns: Vec<String> = crate::db::schema_sync::introspect_table(pool, "posts")
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let has = |name: &str| columns.iter().any(|c| c == name);
    let col = |name: &str| {
        if has(name) {
            name.to_string()
        } else {
            format!("NULL AS {}", name)
        }
    };

    let wanted = [
        "reddit_id", "subreddit", "title", "reddit_url", "url_www", "created_utc", "inserted_at",
        "wayback_www", "wayback_old", "wayback_www_submit_ts", "wayback_old_submit_ts",
        "wayback_www_ok", "wayback_old_ok", "wayback_www_checked_at", "wayback_old_checked_at",
        "wayback_www_ts", "wayback_old_ts", "atoday_www", "atoday_old",
        "atoday_www_ok", "atoday_old_ok", "atoday_www_checked_at", "atoday_old_checked_at",
        "err_wayback_www", "err_wayback_old", "err_atoday_www", "err_atoday_old",
        "err_wayback_avail_www", "err_wayback_avail_old",
    ];
    let select = format!(
        "SELECT {} FROM posts",
        wanted.iter().map(|c| col(*c)).collect::<Vec<_>>().join(", ")
    );

    let rows = sqlx::query(&select).fetch_all(pool).await?;
    let mut imported = 0usize;

    for row in rows {
        let Some(item_id) = row.try_get::<Option<String>, _>("reddit_id")? else {
            continue;
        };
        let first_seen = row
            .try_get::<Option<String>, _>("inserted_at")?
            .and_then(|s| parse_rfc3339(&s))
            .unwrap_or_else(Utc::now);
        let permalink: String = row
            .try_get::<Option<String>, _>("reddit_url")?
            .or(row.try_get::<Option<String>, _>("url_www")?)
            .unwrap_or_default();

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO items (item_id, source_name, title, permalink, published_at, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item_id)
        .bind(row.try_get::<Option<String>, _>("subreddit")?.unwrap_or_default())
        .bind(row.try_get::<Option<String>, _>("title")?)
        .bind(&permalink)
        .bind(row.try_get::<Option<i64>, _>("created_utc")?)
        .bind(to_epoch(first_seen))
        .execute(&mut *tx)
        .await?;

        for (variant, view) in [(Variant::Primary, "www"), (Variant::Alternate, "old")] {
            let wayback = LegacyLeg {
                archive_url: row.try_get(format!("wayback_{}", view).as_str())?,
                submit_ts: row.try_get(format!("wayback_{}_submit_ts", view).as_str())?,
                ok: row.try_get(format!("wayback_{}_ok", view).as_str())?,
                checked_at: row.try_get(format!("wayback_{}_checked_at", view).as_str())?,
                snapshot_ts: row.try_get(format!("wayback_{}_ts", view).as_str())?,
                error: row.try_get(format!("err_wayback_{}", view).as_str())?,
                check_error: row.try_get(format!("err_wayback_avail_{}", view).as_str())?,
            };
            let atoday = LegacyLeg {
                archive_url: row.try_get(format!("atoday_{}", view).as_str())?,
                submit_ts: None,
                ok: row.try_get(format!("atoday_{}_ok", view).as_str())?,
                checked_at: row.try_get(format!("atoday_{}_checked_at", view).as_str())?,
                snapshot_ts: None,
                error: row.try_get(format!("err_atoday_{}", view).as_str())?,
                check_error: None,
            };

            for (service, legacy) in [(Service::Wayback, wayback), (Service::ArchiveToday, atoday)] {
                let Some(leg) = legacy.into_leg(service, first_seen) else {
                    continue;
                };
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO legs (
                        item_id, variant, service, status, submitted_at, archive_url,
                        last_check_at, check_count, error_message, last_check_error,
                        snapshot_at, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&item_id)
                .bind(variant.as_str())
                .bind(service.as_str())
                .bind(leg.status.as_str())
                .bind(leg.submitted_at.map(to_epoch))
                .bind(&leg.archive_url)
                .bind(leg.last_check_at.map(to_epoch))
                .bind(i64::from(leg.check_count))
                .bind(&leg.error_message)
                .bind(&leg.last_check_error)
                .bind(leg.snapshot_at.map(to_epoch))
                .bind(to_epoch(first_seen))
                .bind(to_epoch(Utc::now()))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        imported += 1;
    }

    info!("  Imported {} legacy post(s) into items/legs", imported);
    Ok(())
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One per-view, per-service column group of a legacy post row
struct LegacyLeg {
    archive_url: Option<String>,
    submit_ts: Option<String>,
    ok: Option<i64>,
    checked_at: Option<String>,
    snapshot_ts: Option<String>,
    error: Option<String>,
    /// Last availability-check failure (Wayback only)
    check_error: Option<String>,
}

/// Leg fields recovered from a legacy row
struct ImportedLeg {
    status: LegStatus,
    submitted_at: Option<DateTime<Utc>>,
    archive_url: Option<String>,
    last_check_at: Option<DateTime<Utc>>,
    check_count: u32,
    error_message: Option<String>,
    last_check_error: Option<String>,
    snapshot_at: Option<DateTime<Utc>>,
}

impl LegacyLeg {
    /// Map legacy columns onto the leg state machine; `None` when the leg never existed
    fn into_leg(self, service: Service, first_seen: DateTime<Utc>) -> Option<ImportedLeg> {
        let last_check_at = self.checked_at.as_deref().and_then(parse_rfc3339);
        let snapshot_at = self.snapshot_ts.as_deref().and_then(parse_ts14);

        match service {
            Service::Wayback => {
                let submitted_at = self.submit_ts.as_deref().and_then(parse_ts14)?;
                let checked = last_check_at.is_some();
                let status = match (self.ok, checked) {
                    (Some(1), _) => LegStatus::VerifiedOk,
                    (_, true) => LegStatus::AwaitingVerification,
                    _ => LegStatus::Submitted,
                };
                Some(ImportedLeg {
                    status,
                    submitted_at: Some(submitted_at),
                    archive_url: self.archive_url,
                    last_check_at,
                    check_count: u32::from(checked),
                    error_message: self.error,
                    last_check_error: if status == LegStatus::VerifiedOk { None } else { self.check_error },
                    snapshot_at: if status == LegStatus::VerifiedOk { snapshot_at } else { None },
                })
            }
            Service::ArchiveToday => {
                let attempted_at = last_check_at?;
                let status = match (&self.archive_url, self.ok, &self.error) {
                    (Some(_), _, _) | (None, Some(1), _) => LegStatus::Submitted,
                    (None, _, Some(_)) => LegStatus::Error,
                    (None, _, None) => LegStatus::Submitted,
                };
                Some(ImportedLeg {
                    status,
                    submitted_at: Some(attempted_at.max(first_seen)),
                    archive_url: self.archive_url,
                    last_check_at: None,
                    check_count: 0,
                    error_message: if status == LegStatus::Error { self.error } else { None },
                    last_check_error: None,
                    snapshot_at: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::from_epoch;

    fn epoch(secs: i64) -> DateTime<Utc> {
        from_epoch(secs).unwrap()
    }

    #[test]
    fn test_legacy_wayback_confirmed() {
        let legacy = LegacyLeg {
            archive_url: Some("https://web.archive.org/web/20240101000000/x".to_string()),
            submit_ts: Some("20240101000000".to_string()),
            ok: Some(1),
            checked_at: Some("2024-01-01T00:20:00+00:00".to_string()),
            snapshot_ts: Some("20240101000005".to_string()),
            error: None,
            check_error: None,
        };
        let leg = legacy.into_leg(Service::Wayback, epoch(0)).unwrap();
        assert_eq!(leg.status, LegStatus::VerifiedOk);
        assert_eq!(leg.check_count, 1);
        assert!(leg.snapshot_at.is_some());
    }

    #[test]
    fn test_legacy_wayback_checked_unconfirmed_is_awaiting() {
        let legacy = LegacyLeg {
            archive_url: None,
            submit_ts: Some("20240101000000".to_string()),
            ok: Some(0),
            checked_at: Some("2024-01-01T00:20:00+00:00".to_string()),
            snapshot_ts: Some("20231201000000".to_string()),
            error: None,
            check_error: Some("HTTP 503".to_string()),
        };
        let leg = legacy.into_leg(Service::Wayback, epoch(0)).unwrap();
        assert_eq!(leg.status, LegStatus::AwaitingVerification);
        assert_eq!(leg.snapshot_at, None);
        assert_eq!(leg.last_check_error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_legacy_wayback_never_submitted_skipped() {
        let legacy = LegacyLeg {
            archive_url: None,
            submit_ts: None,
            ok: None,
            checked_at: None,
            snapshot_ts: None,
            error: None,
            check_error: None,
        };
        assert!(legacy.into_leg(Service::Wayback, epoch(0)).is_none());
    }

    #[test]
    fn test_legacy_archive_today_blocked_is_error() {
        let legacy = LegacyLeg {
            archive_url: None,
            submit_ts: None,
            ok: None,
            checked_at: Some("2024-01-01T00:00:10+00:00".to_string()),
            snapshot_ts: None,
            error: Some("Archive.today blocked (captcha/Cloudflare)".to_string()),
            check_error: None,
        };
        let leg = legacy.into_leg(Service::ArchiveToday, epoch(0)).unwrap();
        assert_eq!(leg.status, LegStatus::Error);
    }

    #[test]
    fn test_legacy_archive_today_ok_flag_without_link_is_submitted() {
        let legacy = LegacyLeg {
            archive_url: None,
            submit_ts: None,
            ok: Some(1),
            checked_at: Some("2024-01-01T00:00:10+00:00".to_string()),
            snapshot_ts: None,
            error: Some("stale error".to_string()),
            check_error: None,
        };
        let leg = legacy.into_leg(Service::ArchiveToday, epoch(0)).unwrap();
        assert_eq!(leg.status, LegStatus::Submitted);
        assert_eq!(leg.error_message, None);
    }
}
