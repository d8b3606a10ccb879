//! Submission dispatcher
//!
//! Walks every `Unsubmitted` leg of the configured services, builds the
//! variant URL, waits on the service's rate limiter and records the outcome:
//!
//! | Outcome                  | Leg becomes                         |
//! |--------------------------|-------------------------------------|
//! | archived with URL        | `Submitted`, `archive_url` set      |
//! | accepted without URL     | `Submitted`, `archive_url` null     |
//! | rejected                 | `Error` with the classified reason  |
//! | transport failure        | stays `Unsubmitted`, error recorded |
//!
//! No store transaction is open while waiting or talking to a service.

use rra_common::db::{legs_due_for_submission, update_leg, Leg, LegStatus, LegWithItem, Service};
use rra_common::time::Clock;
use rra_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::services::permalink::variant_url;
use crate::services::{ArchiveService, RateLimiter, SubmitOutcome};

/// Counters for one dispatcher pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub archived: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub transport_errors: usize,
    pub store_errors: usize,
}

impl DispatchReport {
    pub fn submitted(&self) -> usize {
        self.archived + self.accepted
    }
}

enum LegResult {
    Archived,
    Accepted,
    Rejected,
    TransportError,
    Cancelled,
}

/// One archival service and its limiter
struct Lane {
    service: Arc<dyn ArchiveService>,
    limiter: RateLimiter,
}

pub struct Dispatcher {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    jitter: Duration,
    lanes: Vec<Lane>,
}

impl Dispatcher {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            jitter: Duration::ZERO,
            lanes: Vec::new(),
        }
    }

    /// Random extra in `[0, jitter]` added to every service's delay
    ///
    /// Applies to services registered before and after this call.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self.lanes = self
            .lanes
            .into_iter()
            .map(|lane| Lane {
                limiter: lane.limiter.with_jitter(jitter),
                service: lane.service,
            })
            .collect();
        self
    }

    /// Register a service with its minimum inter-submission delay
    pub fn with_service(mut self, service: Arc<dyn ArchiveService>, delay: Duration) -> Self {
        let limiter =
            RateLimiter::new(service.service(), delay, self.clock.clone()).with_jitter(self.jitter);
        self.lanes.push(Lane { service, limiter });
        self
    }

    /// Services this dispatcher submits to
    pub fn services(&self) -> Vec<Service> {
        self.lanes.iter().map(|lane| lane.service.service()).collect()
    }

    /// Submit every pending leg once
    ///
    /// Per-leg failures are counted and logged; only a failure to list the
    /// pending legs aborts the pass.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<DispatchReport> {
        let pending = legs_due_for_submission(&self.db, &self.services()).await?;
        let mut report = DispatchReport::default();

        if !pending.is_empty() {
            tracing::debug!(legs = pending.len(), "Dispatcher pass");
        }

        for leg in pending {
            if cancel.is_cancelled() {
                tracing::info!("Dispatcher pass interrupted by shutdown");
                break;
            }

            let Some(lane) = self
                .lanes
                .iter()
                .find(|lane| lane.service.service() == leg.leg.key.service)
            else {
                continue;
            };

            let key = leg.leg.key.clone();
            match self.submit_leg(lane, leg, cancel).await {
                Ok(LegResult::Archived) => report.archived += 1,
                Ok(LegResult::Accepted) => report.accepted += 1,
                Ok(LegResult::Rejected) => report.rejected += 1,
                Ok(LegResult::TransportError) => report.transport_errors += 1,
                Ok(LegResult::Cancelled) => break,
                Err(e) => {
                    report.store_errors += 1;
                    tracing::warn!(
                        item_id = %key.item_id,
                        variant = %key.variant,
                        service = %key.service,
                        error = %e,
                        "Failed to record submission outcome"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn submit_leg(
        &self,
        lane: &Lane,
        pending: LegWithItem,
        cancel: &CancellationToken,
    ) -> Result<LegResult> {
        let LegWithItem { mut leg, item } = pending;

        let url = match variant_url(&item.permalink, leg.key.variant) {
            Ok(url) => url,
            Err(e) => {
                leg.status = LegStatus::Error;
                leg.error_message = Some(format!("invalid permalink {:?}: {}", item.permalink, e));
                tracing::warn!(item_id = %leg.key.item_id, error = %e, "Cannot build variant URL");
                update_leg(&self.db, &leg).await?;
                return Ok(LegResult::Rejected);
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(LegResult::Cancelled),
            _ = lane.limiter.wait() => {}
        }

        let submitted_at = self.clock.now();
        let outcome = lane.service.submit(&url).await;

        let result = apply_outcome(&mut leg, outcome, submitted_at);
        log_outcome(&leg, &url);
        update_leg(&self.db, &leg).await?;
        Ok(result)
    }
}

fn apply_outcome(
    leg: &mut Leg,
    outcome: std::result::Result<SubmitOutcome, crate::services::TransportError>,
    submitted_at: chrono::DateTime<chrono::Utc>,
) -> LegResult {
    match outcome {
        Ok(SubmitOutcome::Archived { archive_url }) => {
            leg.status = LegStatus::Submitted;
            leg.submitted_at = Some(submitted_at);
            leg.archive_url = Some(archive_url);
            leg.error_message = None;
            LegResult::Archived
        }
        Ok(SubmitOutcome::Accepted) => {
            leg.status = LegStatus::Submitted;
            leg.submitted_at = Some(submitted_at);
            leg.archive_url = None;
            leg.error_message = None;
            LegResult::Accepted
        }
        Ok(SubmitOutcome::Rejected { reason }) => {
            leg.status = LegStatus::Error;
            leg.submitted_at = Some(submitted_at);
            leg.error_message = Some(reason);
            LegResult::Rejected
        }
        Err(e) => {
            leg.error_message = Some(e.to_string());
            LegResult::TransportError
        }
    }
}

fn log_outcome(leg: &Leg, url: &str) {
    let key = &leg.key;
    match leg.status {
        LegStatus::Submitted => tracing::info!(
            item_id = %key.item_id,
            variant = %key.variant,
            service = %key.service,
            status = %leg.status,
            archive_url = leg.archive_url.as_deref().unwrap_or("-"),
            "Submitted {}",
            url
        ),
        LegStatus::Error => tracing::warn!(
            item_id = %key.item_id,
            variant = %key.variant,
            service = %key.service,
            reason = leg.error_message.as_deref().unwrap_or(""),
            "Submission rejected"
        ),
        _ => tracing::warn!(
            item_id = %key.item_id,
            variant = %key.variant,
            service = %key.service,
            error = leg.error_message.as_deref().unwrap_or(""),
            "Submission failed, will retry next cycle"
        ),
    }
}
