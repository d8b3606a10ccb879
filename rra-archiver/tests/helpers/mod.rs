//! Test doubles for the external collaborators and store setup

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rra_archiver::services::{
    ArchiveService, AvailabilityChecker, FeedEntry, FeedSource, Snapshot, SubmitOutcome,
    TransportError,
};
use rra_common::db::{init_database, Service};
use rra_common::time::{from_epoch, Clock};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Fresh on-disk store; keep the `TempDir` alive for the test's duration
pub async fn open_store() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("archiver.sqlite"))
        .await
        .unwrap();
    (temp_dir, pool)
}

pub fn post_url(item_id: &str) -> String {
    format!("https://www.reddit.com/r/rust/comments/{}/a_post/", item_id)
}

pub fn entry(item_id: &str) -> FeedEntry {
    FeedEntry {
        source_name: "rust".to_string(),
        permalink: post_url(item_id),
        title: format!("Post {}", item_id),
        published_at: Some(from_epoch(0).unwrap()),
    }
}

/// Feed returning fixed entries per source
#[derive(Default)]
pub struct FakeFeed {
    entries: Mutex<HashMap<String, Vec<FeedEntry>>>,
    failing: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn with(source: &str, entries: Vec<FeedEntry>) -> Self {
        let feed = Self::default();
        feed.set(source, entries);
        feed
    }

    pub fn set(&self, source: &str, entries: Vec<FeedEntry>) {
        self.entries.lock().unwrap().insert(source.to_string(), entries);
    }

    pub fn fail(&self, source: &str) {
        self.failing.lock().unwrap().push(source.to_string());
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch(&self, source: &str, limit: usize) -> Result<Vec<FeedEntry>, TransportError> {
        if self.failing.lock().unwrap().iter().any(|s| s == source) {
            return Err(TransportError::Http(503));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(source)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Archival service that records every call with the simulated time
pub struct FakeArchive {
    service: Service,
    clock: Arc<dyn Clock>,
    calls: Mutex<Vec<(String, DateTime<Utc>)>>,
    /// Outcomes keyed by URL substring; first match wins
    scripted: Mutex<Vec<(String, Result<SubmitOutcome, TransportError>)>>,
    queued: Mutex<VecDeque<Result<SubmitOutcome, TransportError>>>,
}

impl FakeArchive {
    pub fn new(service: Service, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            clock,
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
        }
    }

    /// Answer calls whose URL contains `needle` with `outcome`
    pub fn script(&self, needle: &str, outcome: Result<SubmitOutcome, TransportError>) {
        self.scripted.lock().unwrap().push((needle.to_string(), outcome));
    }

    /// Answer the next unscripted call with `outcome`
    pub fn queue(&self, outcome: Result<SubmitOutcome, TransportError>) {
        self.queued.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<(String, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveService for FakeArchive {
    fn service(&self) -> Service {
        self.service
    }

    async fn submit(&self, url: &str) -> Result<SubmitOutcome, TransportError> {
        self.calls.lock().unwrap().push((url.to_string(), self.clock.now()));

        if let Some((_, outcome)) = self
            .scripted
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| url.contains(needle.as_str()))
        {
            return outcome.clone();
        }
        if let Some(outcome) = self.queued.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(SubmitOutcome::Archived {
            archive_url: format!("https://archive.example/{}", url.len()),
        })
    }
}

/// Availability interface with one configurable answer for every URL
pub struct FakeChecker {
    response: Mutex<Result<Option<i64>, TransportError>>,
    calls: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeChecker {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(Ok(None)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report a capture at `epoch_secs`
    pub fn snapshot_at(&self, epoch_secs: i64) {
        *self.response.lock().unwrap() = Ok(Some(epoch_secs));
    }

    pub fn no_snapshot(&self) {
        *self.response.lock().unwrap() = Ok(None);
    }

    pub fn failing(&self, err: TransportError) {
        *self.response.lock().unwrap() = Err(err);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AvailabilityChecker for FakeChecker {
    fn service(&self) -> Service {
        Service::Wayback
    }

    async fn check(
        &self,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, TransportError> {
        self.calls.lock().unwrap().push((url.to_string(), since));
        let response = self.response.lock().unwrap().clone();
        response.map(|found| {
            found.map(|secs| Snapshot {
                url: format!("https://web.archive.org/web/{}/{}", secs, url),
                captured_at: from_epoch(secs).unwrap(),
            })
        })
    }
}
