//! Leg queries and the guarded leg update
//!
//! Every write runs in its own short transaction wrapped in
//! [`retry_on_lock`]; nothing here is held open across a network call.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::db::items::item_from_row;
use crate::db::models::{DisplayState, Leg, LegKey, LegStatus, LegWithItem, Service, Variant};
use crate::db::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use crate::time::{from_epoch, to_epoch, to_epoch_floor};
use crate::{Error, Result};

const LEG_WITH_ITEM_SELECT: &str = r#"
    SELECT
        l.item_id, l.variant, l.service, l.status, l.submitted_at, l.archive_url,
        l.last_check_at, l.check_count, l.error_message, l.last_check_error,
        l.snapshot_at, l.created_at,
        i.item_id AS item_item_id, i.source_name AS item_source_name,
        i.title AS item_title, i.permalink AS item_permalink,
        i.published_at AS item_published_at, i.first_seen_at AS item_first_seen_at
    FROM legs l
    JOIN items i ON i.item_id = l.item_id
"#;

/// Create one `Unsubmitted` leg per (variant, service) pair that does not exist yet
///
/// Returns how many legs were created; existing legs are never touched.
pub async fn create_legs_if_absent(
    pool: &SqlitePool,
    item_id: &str,
    variants: &[Variant],
    services: &[Service],
    now: DateTime<Utc>,
) -> Result<usize> {
    retry_on_lock("create legs", DEFAULT_MAX_LOCK_WAIT, || async move {
        let mut tx = pool.begin().await?;
        let mut created = 0;

        for variant in variants {
            for service in services {
                let result = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO legs (item_id, variant, service, status, check_count, created_at, updated_at)
                    VALUES (?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(item_id)
                .bind(variant.as_str())
                .bind(service.as_str())
                .bind(LegStatus::Unsubmitted.as_str())
                .bind(to_epoch(now))
                .bind(to_epoch(now))
                .execute(&mut *tx)
                .await?;
                created += result.rows_affected() as usize;
            }
        }

        tx.commit().await?;
        Ok(created)
    })
    .await
}

/// `Unsubmitted` legs of the given services, oldest item first
pub async fn legs_due_for_submission(
    pool: &SqlitePool,
    services: &[Service],
) -> Result<Vec<LegWithItem>> {
    if services.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "{} WHERE l.status = ? AND l.service IN ({}) \
         ORDER BY i.first_seen_at ASC, l.item_id ASC, l.variant ASC, l.service ASC",
        LEG_WITH_ITEM_SELECT,
        placeholders(services.len())
    );

    let mut query = sqlx::query(&sql).bind(LegStatus::Unsubmitted.as_str());
    for service in services {
        query = query.bind(service.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(leg_with_item_from_row).collect()
}

/// Legs eligible for an availability check at `now`
///
/// Only verifiable services, status `Submitted` or `AwaitingVerification`,
/// submitted at least `min_age` ago, and never checked or last checked at
/// least `recheck_interval` ago. Least recently checked first, at most
/// `batch_size` legs.
pub async fn legs_due_for_verification(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    min_age: Duration,
    recheck_interval: Duration,
    batch_size: usize,
) -> Result<Vec<LegWithItem>> {
    let verifiable: Vec<Service> = Service::ALL
        .into_iter()
        .filter(|s| s.is_verifiable())
        .collect();
    if verifiable.is_empty() || batch_size == 0 {
        return Ok(Vec::new());
    }

    let submitted_before = window_start(now, min_age);
    let checked_before = window_start(now, recheck_interval);

    let sql = format!(
        "{} WHERE l.service IN ({}) \
           AND l.status IN (?, ?) \
           AND l.submitted_at IS NOT NULL \
           AND l.submitted_at <= ? \
           AND (l.last_check_at IS NULL OR l.last_check_at <= ?) \
         ORDER BY COALESCE(l.last_check_at, 0) ASC, l.submitted_at ASC, l.item_id ASC \
         LIMIT ?",
        LEG_WITH_ITEM_SELECT,
        placeholders(verifiable.len())
    );

    let mut query = sqlx::query(&sql);
    for service in &verifiable {
        query = query.bind(service.as_str());
    }
    let rows = query
        .bind(LegStatus::Submitted.as_str())
        .bind(LegStatus::AwaitingVerification.as_str())
        .bind(submitted_before)
        .bind(checked_before)
        .bind(batch_size as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(leg_with_item_from_row).collect()
}

/// Persist a leg's mutable fields, enforcing the status transition guard
///
/// The stored status is re-read inside the transaction; a forbidden move
/// fails with [`Error::InvalidTransition`] and writes nothing.
pub async fn update_leg(pool: &SqlitePool, leg: &Leg) -> Result<()> {
    retry_on_lock("update leg", DEFAULT_MAX_LOCK_WAIT, || async move {
        let mut tx = pool.begin().await?;

        let stored: Option<String> = sqlx::query_scalar(
            "SELECT status FROM legs WHERE item_id = ? AND variant = ? AND service = ?",
        )
        .bind(&leg.key.item_id)
        .bind(leg.key.variant.as_str())
        .bind(leg.key.service.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            return Err(Error::NotFound(format!("Leg {}", leg.key)));
        };
        let current: LegStatus = stored.parse().map_err(corrupt)?;

        if !current.can_transition_to(leg.status) {
            return Err(Error::InvalidTransition {
                key: leg.key.to_string(),
                from: current.to_string(),
                to: leg.status.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE legs SET
                status = ?,
                submitted_at = ?,
                archive_url = ?,
                last_check_at = ?,
                check_count = ?,
                error_message = ?,
                last_check_error = ?,
                snapshot_at = ?,
                updated_at = ?
            WHERE item_id = ? AND variant = ? AND service = ?
            "#,
        )
        .bind(leg.status.as_str())
        .bind(leg.submitted_at.map(to_epoch))
        .bind(&leg.archive_url)
        .bind(leg.last_check_at.map(to_epoch))
        .bind(i64::from(leg.check_count))
        .bind(&leg.error_message)
        .bind(&leg.last_check_error)
        .bind(leg.snapshot_at.map(to_epoch))
        .bind(to_epoch(Utc::now()))
        .bind(&leg.key.item_id)
        .bind(leg.key.variant.as_str())
        .bind(leg.key.service.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Look up one leg with its item
pub async fn get_leg(pool: &SqlitePool, key: &LegKey) -> Result<Option<LegWithItem>> {
    let sql = format!(
        "{} WHERE l.item_id = ? AND l.variant = ? AND l.service = ?",
        LEG_WITH_ITEM_SELECT
    );
    let row = sqlx::query(&sql)
        .bind(&key.item_id)
        .bind(key.variant.as_str())
        .bind(key.service.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(leg_with_item_from_row).transpose()
}

/// Most recent `limit` legs joined with their items, newest item first
pub async fn recent_legs(pool: &SqlitePool, limit: usize) -> Result<Vec<LegWithItem>> {
    let sql = format!(
        "{} ORDER BY i.first_seen_at DESC, l.item_id DESC, l.variant ASC, l.service ASC LIMIT ?",
        LEG_WITH_ITEM_SELECT
    );
    let rows = sqlx::query(&sql)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(leg_with_item_from_row).collect()
}

/// Leg counts per service and display state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegStats {
    pub items: i64,
    pub legs: i64,
    /// service -> display state code -> count
    pub by_service: BTreeMap<String, BTreeMap<String, i64>>,
}

impl LegStats {
    pub fn count(&self, service: Service, state: DisplayState) -> i64 {
        self.by_service
            .get(service.as_str())
            .and_then(|states| states.get(state.code()))
            .copied()
            .unwrap_or(0)
    }
}

/// Aggregate counts for reporting
pub async fn leg_stats(pool: &SqlitePool) -> Result<LegStats> {
    let rows = sqlx::query(
        r#"
        SELECT service, status, check_count > 0 AS checked, COUNT(*) AS n
        FROM legs
        GROUP BY service, status, checked
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut stats = LegStats {
        items: crate::db::items::count_items(pool).await?,
        ..LegStats::default()
    };

    for service in Service::ALL {
        let states = stats.by_service.entry(service.as_str().to_string()).or_default();
        for state in DisplayState::ALL {
            states.insert(state.code().to_string(), 0);
        }
    }

    for row in rows {
        let service: Service = row.try_get::<String, _>("service")?.parse().map_err(corrupt)?;
        let status: LegStatus = row.try_get::<String, _>("status")?.parse().map_err(corrupt)?;
        let checked = row.try_get::<i64, _>("checked")? != 0;
        let n: i64 = row.try_get("n")?;

        let mut probe = Leg::new(LegKey::new("", Variant::Primary, service), Utc::now());
        probe.status = status;
        probe.check_count = u32::from(checked);

        *stats
            .by_service
            .entry(service.as_str().to_string())
            .or_default()
            .entry(probe.display_state().code().to_string())
            .or_insert(0) += n;
        stats.legs += n;
    }

    Ok(stats)
}

/// Administrative resubmission: move every `Error` leg back to `Unsubmitted`
///
/// Clears the error and submission fields so the dispatcher picks the legs
/// up again; `check_count` and `last_check_error` stay as history.
pub async fn requeue_errored_legs(pool: &SqlitePool) -> Result<u64> {
    retry_on_lock("requeue errored legs", DEFAULT_MAX_LOCK_WAIT, || async move {
        let mut tx = pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE legs SET
                status = ?,
                error_message = NULL,
                submitted_at = NULL,
                archive_url = NULL,
                updated_at = ?
            WHERE status = ?
            "#,
        )
        .bind(LegStatus::Unsubmitted.as_str())
        .bind(to_epoch(Utc::now()))
        .bind(LegStatus::Error.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    })
    .await
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Latest stored second that is at least `age` before `now`
///
/// Stored event times are rounded up, so `stored <= window_start` implies
/// the full `age` has elapsed. Saturates at the far past.
fn window_start(now: DateTime<Utc>, age: Duration) -> i64 {
    ChronoDuration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .map(to_epoch_floor)
        .unwrap_or(i64::MIN)
}

fn corrupt(err: Error) -> Error {
    Error::Internal(format!("Corrupt leg row: {}", err))
}

fn leg_from_row(row: &SqliteRow) -> Result<Leg> {
    let opt_ts = |name: &str| -> Result<Option<DateTime<Utc>>> {
        row.try_get::<Option<i64>, _>(name)?
            .map(from_epoch)
            .transpose()
    };

    let check_count: i64 = row.try_get("check_count")?;

    Ok(Leg {
        key: LegKey {
            item_id: row.try_get("item_id")?,
            variant: row.try_get::<String, _>("variant")?.parse().map_err(corrupt)?,
            service: row.try_get::<String, _>("service")?.parse().map_err(corrupt)?,
        },
        status: row.try_get::<String, _>("status")?.parse().map_err(corrupt)?,
        submitted_at: opt_ts("submitted_at")?,
        archive_url: row.try_get("archive_url")?,
        last_check_at: opt_ts("last_check_at")?,
        check_count: u32::try_from(check_count.max(0)).unwrap_or(u32::MAX),
        error_message: row.try_get("error_message")?,
        last_check_error: row.try_get("last_check_error")?,
        snapshot_at: opt_ts("snapshot_at")?,
        created_at: from_epoch(row.try_get("created_at")?)?,
    })
}

fn leg_with_item_from_row(row: &SqliteRow) -> Result<LegWithItem> {
    Ok(LegWithItem {
        leg: leg_from_row(row)?,
        item: item_from_row(row, "item_")?,
    })
}
