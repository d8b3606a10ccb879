//! JSON export of the most recent legs
//!
//! The file is written next to its destination and renamed into place, so a
//! reader never sees a half-written document.

use chrono::{DateTime, Utc};
use rra_common::db::{recent_legs, LegWithItem};
use rra_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// One exported leg with its item
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub item_id: String,
    pub source_name: String,
    pub title: String,
    pub permalink: String,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub variant: String,
    pub service: String,
    pub status: String,
    pub display_state: String,
    pub display_label: String,
    pub archive_url: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub check_count: u32,
    pub snapshot_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Most recent availability-check failure, kept while the leg is still open
    pub last_check_error: Option<String>,
}

impl From<LegWithItem> for ExportRecord {
    fn from(row: LegWithItem) -> Self {
        let state = row.leg.display_state();
        let LegWithItem { leg, item } = row;
        Self {
            item_id: item.item_id,
            source_name: item.source_name,
            title: item.title,
            permalink: item.permalink,
            published_at: item.published_at,
            first_seen_at: item.first_seen_at,
            variant: leg.key.variant.to_string(),
            service: leg.key.service.to_string(),
            status: leg.status.to_string(),
            display_state: state.code().to_string(),
            display_label: state.label().to_string(),
            archive_url: leg.archive_url,
            submitted_at: leg.submitted_at,
            last_check_at: leg.last_check_at,
            check_count: leg.check_count,
            snapshot_at: leg.snapshot_at,
            error_message: leg.error_message,
            last_check_error: leg.last_check_error,
        }
    }
}

/// Write the `limit` most recent legs to `path`; returns the record count
pub async fn write_json(pool: &SqlitePool, path: &Path, limit: usize) -> Result<usize> {
    let records: Vec<ExportRecord> = recent_legs(pool, limit)
        .await?
        .into_iter()
        .map(ExportRecord::from)
        .collect();

    let json = serde_json::to_vec_pretty(&records)
        .map_err(|e| Error::Internal(format!("JSON export serialization failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;

    Ok(records.len())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_sits_next_to_target() {
        assert_eq!(
            temp_path(Path::new("/var/lib/rra/latest.json")),
            PathBuf::from("/var/lib/rra/latest.json.tmp")
        );
    }
}
