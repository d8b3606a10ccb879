//! Wayback Machine client: save requests and the availability API
//!
//! Saves are issued without following redirects; the capture location comes
//! back in `Content-Location` or `Location`. Availability answers with the
//! capture closest to a requested timestamp, which the verifier compares
//! against the submission time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LOCATION, LOCATION};
use rra_common::db::Service;
use rra_common::time::{parse_ts14, to_ts14};
use serde::Deserialize;

use super::{
    ArchiveService, AvailabilityChecker, Snapshot, SubmitOutcome, TransportError, QUERY_TIMEOUT,
    SUBMIT_TIMEOUT, USER_AGENT,
};

const WAYBACK_BASE: &str = "https://web.archive.org";
const WAYBACK_SAVE_PREFIX: &str = "https://web.archive.org/save/";
const WAYBACK_AVAILABLE_ENDPOINT: &str = "https://archive.org/wayback/available";

/// HTTP client for the Wayback Machine
pub struct WaybackClient {
    http_client: reqwest::Client,
}

impl WaybackClient {
    pub fn new() -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl ArchiveService for WaybackClient {
    fn service(&self) -> Service {
        Service::Wayback
    }

    async fn submit(&self, url: &str) -> Result<SubmitOutcome, TransportError> {
        let save_url = format!("{}{}", WAYBACK_SAVE_PREFIX, url);
        tracing::debug!(url = %url, "Submitting to Wayback");

        let response = self
            .http_client
            .get(&save_url)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await?;

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_location = header(CONTENT_LOCATION);
        let location = header(LOCATION);

        classify_save_response(
            response.status().as_u16(),
            content_location.as_deref(),
            location.as_deref(),
        )
    }
}

#[async_trait]
impl AvailabilityChecker for WaybackClient {
    fn service(&self) -> Service {
        Service::Wayback
    }

    async fn check(&self, url: &str, since: DateTime<Utc>) -> Result<Option<Snapshot>, TransportError> {
        let timestamp = to_ts14(since);
        let response = self
            .http_client
            .get(WAYBACK_AVAILABLE_ENDPOINT)
            .query(&[("url", url), ("timestamp", timestamp.as_str())])
            .timeout(QUERY_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        let body: AvailabilityResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;

        closest_snapshot(body)
    }
}

/// Interpret a save response
pub fn classify_save_response(
    status: u16,
    content_location: Option<&str>,
    location: Option<&str>,
) -> Result<SubmitOutcome, TransportError> {
    if let Some(loc) = content_location.map(str::trim).filter(|l| !l.is_empty()) {
        return Ok(SubmitOutcome::Archived {
            archive_url: resolve_wayback_url(loc),
        });
    }

    if let Some(loc) = location.map(str::trim) {
        if loc.starts_with('/') || loc.contains("web.archive.org") {
            return Ok(SubmitOutcome::Archived {
                archive_url: resolve_wayback_url(loc),
            });
        }
    }

    match status {
        200..=299 => Ok(SubmitOutcome::Accepted),
        429 | 500..=599 => Err(TransportError::Http(status)),
        400..=499 => Ok(SubmitOutcome::Rejected {
            reason: format!("Wayback HTTP {}", status),
        }),
        _ => Err(TransportError::Http(status)),
    }
}

fn resolve_wayback_url(loc: &str) -> String {
    if loc.starts_with('/') {
        format!("{}{}", WAYBACK_BASE, loc)
    } else {
        loc.to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<ClosestSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ClosestSnapshot {
    #[serde(default)]
    available: bool,
    url: Option<String>,
    timestamp: Option<String>,
}

/// Extract the reported capture; `None` when nothing is archived
pub fn closest_snapshot(body: AvailabilityResponse) -> Result<Option<Snapshot>, TransportError> {
    let Some(closest) = body.archived_snapshots.closest else {
        return Ok(None);
    };
    if !closest.available {
        return Ok(None);
    }

    let timestamp = closest.timestamp.unwrap_or_default();
    let captured_at = parse_ts14(&timestamp)
        .ok_or_else(|| TransportError::Parse(format!("Bad snapshot timestamp: {:?}", timestamp)))?;

    Ok(Some(Snapshot {
        url: closest.url.unwrap_or_default(),
        captured_at,
    }))
}
