//! Cycle coordinator
//!
//! One cycle discovers new items from every source, runs one dispatcher
//! pass and one verification pass, then refreshes the JSON export. Cycles
//! never overlap. In continuous mode the coordinator waits `interval`
//! between cycles; the wait ends early on shutdown.

use rra_common::config::Settings;
use rra_common::db::{create_legs_if_absent, upsert_item, Item, Service, Variant};
use rra_common::time::Clock;
use rra_common::Result;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::services::permalink::{canonicalize, extract_item_id};
use crate::services::{FeedEntry, FeedSource};
use crate::workflow::dispatcher::{DispatchReport, Dispatcher};
use crate::workflow::export::write_json;
use crate::workflow::verifier::{Verifier, VerifyReport};

/// Single pass or continuous loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Once,
    Continuous,
}

/// Coordinator settings resolved from configuration and CLI
#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub sources: Vec<String>,
    pub scan_limit: usize,
    /// Services legs are created for
    pub services: Vec<Service>,
    pub interval: Duration,
    pub out_json: Option<PathBuf>,
    pub json_limit: usize,
}

impl CycleConfig {
    pub fn from_settings(settings: &Settings, sources: Vec<String>) -> Self {
        let services = Service::ALL
            .into_iter()
            .filter(|service| match service {
                Service::Wayback => settings.do_wayback,
                Service::ArchiveToday => settings.do_archive_today,
            })
            .collect();

        Self {
            sources,
            scan_limit: settings.scan_limit,
            services,
            interval: settings.interval(),
            out_json: settings.out_json.as_ref().map(PathBuf::from),
            json_limit: settings.json_limit,
        }
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub entries_seen: usize,
    pub new_items: usize,
    pub legs_created: usize,
    pub feed_errors: usize,
    pub dispatch: DispatchReport,
    pub verify: VerifyReport,
}

pub struct Coordinator {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    feed: Arc<dyn FeedSource>,
    dispatcher: Dispatcher,
    verifier: Verifier,
    config: CycleConfig,
}

impl Coordinator {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        feed: Arc<dyn FeedSource>,
        dispatcher: Dispatcher,
        verifier: Verifier,
        config: CycleConfig,
    ) -> Self {
        Self {
            db,
            clock,
            feed,
            dispatcher,
            verifier,
            config,
        }
    }

    /// Run cycles until shutdown (or once)
    ///
    /// In continuous mode a failed cycle is logged and the next one runs on
    /// schedule. In single-pass mode the cycle's error is returned.
    pub async fn run(&self, mode: RunMode, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(cancel).await {
                Ok(report) => log_report(&report),
                Err(e) if mode == RunMode::Once => return Err(e),
                Err(e) => tracing::warn!(error = %e, "Cycle failed; retrying next cycle"),
            }

            if mode == RunMode::Once {
                break;
            }

            tracing::debug!(interval_secs = self.config.interval.as_secs(), "Waiting for next cycle");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Coordinator stopped");
        Ok(())
    }

    /// Discover, dispatch, verify, export
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for source in &self.config.sources {
            if cancel.is_cancelled() {
                return Ok(report);
            }

            match self.feed.fetch(source, self.config.scan_limit).await {
                Ok(entries) => {
                    report.entries_seen += entries.len();
                    for entry in entries {
                        self.discover(entry, &mut report).await;
                    }
                }
                Err(e) => {
                    report.feed_errors += 1;
                    tracing::warn!(source = %source, error = %e, "Feed fetch failed");
                }
            }
        }

        report.dispatch = self.dispatcher.run_pass(cancel).await?;

        if cancel.is_cancelled() {
            return Ok(report);
        }
        report.verify = self.verifier.run_pass(cancel).await?;

        if let Some(path) = &self.config.out_json {
            match write_json(&self.db, path, self.config.json_limit).await {
                Ok(count) => tracing::debug!(path = %path.display(), records = count, "JSON export written"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "JSON export failed"),
            }
        }

        Ok(report)
    }

    /// Record one feed entry and make sure its legs exist
    async fn discover(&self, entry: FeedEntry, report: &mut CycleReport) {
        let Some(permalink) = canonicalize(&entry.permalink) else {
            tracing::warn!(link = %entry.permalink, "Skipping entry with unparseable link");
            return;
        };
        let Some(item_id) = extract_item_id(&permalink) else {
            tracing::debug!(link = %permalink, "Skipping entry without item id");
            return;
        };

        let now = self.clock.now();
        let item = Item {
            item_id: item_id.clone(),
            source_name: entry.source_name,
            title: entry.title,
            permalink,
            published_at: entry.published_at,
            first_seen_at: now,
        };

        match upsert_item(&self.db, &item).await {
            Ok(true) => {
                report.new_items += 1;
                tracing::info!(item_id = %item.item_id, source = %item.source_name, "New item: {}", item.title);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(item_id = %item_id, error = %e, "Failed to store item");
                return;
            }
        }

        // Also backfills legs for services enabled after the item was first seen
        match create_legs_if_absent(&self.db, &item_id, &Variant::ALL, &self.config.services, now).await {
            Ok(created) => report.legs_created += created,
            Err(e) => tracing::warn!(item_id = %item_id, error = %e, "Failed to create legs"),
        }
    }
}

fn log_report(report: &CycleReport) {
    tracing::info!(
        entries = report.entries_seen,
        new_items = report.new_items,
        legs_created = report.legs_created,
        submitted = report.dispatch.submitted(),
        rejected = report.dispatch.rejected,
        submit_failures = report.dispatch.transport_errors,
        checked = report.verify.checked,
        confirmed = report.verify.confirmed,
        awaiting = report.verify.awaiting,
        failed = report.verify.failed,
        "Cycle complete"
    );
}
