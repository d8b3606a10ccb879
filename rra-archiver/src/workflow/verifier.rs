//! Verification scheduler
//!
//! Re-checks submitted legs of timestamp-verifiable services. A leg is
//! confirmed only by a capture taken at or after its submission; an older
//! capture is a pre-existing snapshot and proves nothing about this
//! submission.
//!
//! Unconfirmed legs stay `AwaitingVerification` until the verification
//! ceiling (check count or age) is reached, then become `VerifiedFailed`.
//! Transport failures count towards the ceiling but leave the status alone;
//! a leg whose ceiling runs out on a failed check becomes `Error`.

use chrono::{DateTime, Utc};
use rra_common::config::Settings;
use rra_common::db::{legs_due_for_verification, update_leg, Leg, LegStatus, LegWithItem, Service};
use rra_common::time::Clock;
use rra_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::services::permalink::variant_url;
use crate::services::rate_limiter::jittered;
use crate::services::{AvailabilityChecker, Snapshot, TransportError};

/// Error recorded when the ceiling runs out without a conclusive answer
pub const EXHAUSTED_UNRESOLVED: &str = "verification exhausted: unresolved";

/// Selection window and ceiling for verification passes
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyPolicy {
    pub min_age: Duration,
    pub recheck_interval: Duration,
    pub batch_size: usize,
    pub max_checks: u32,
    pub max_age: Duration,
    /// Pause between two checks of one pass
    pub pause: Duration,
    /// Upper bound of a random extra added to each pause
    pub pause_jitter: Duration,
}

impl VerifyPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_age: Duration::from_secs(settings.verify_min_age),
            recheck_interval: Duration::from_secs(settings.verify_recheck_interval),
            batch_size: settings.verify_batch,
            max_checks: settings.verify_max_checks,
            max_age: Duration::from_secs(settings.verify_max_age),
            pause: settings.verify_pause(),
            pause_jitter: settings.delay_jitter(),
        }
    }

    /// Whether a leg checked `check_count` times has no recheck left at `now`
    pub fn is_exhausted(&self, check_count: u32, submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = (now - submitted_at).to_std().unwrap_or(Duration::ZERO);
        check_count >= self.max_checks || age >= self.max_age
    }
}

/// What one availability check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckVerdict {
    Confirmed,
    Awaiting,
    Failed,
    /// Transport failure; status unchanged
    Inconclusive,
    /// Transport failure that exhausted the ceiling
    Unresolved,
}

/// Counters for one verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub confirmed: usize,
    pub awaiting: usize,
    pub failed: usize,
    pub inconclusive: usize,
    pub unresolved: usize,
    pub store_errors: usize,
}

/// Apply one check result to a leg
///
/// Always counts the check and stamps `last_check_at`.
pub fn apply_check(
    leg: &mut Leg,
    result: std::result::Result<Option<Snapshot>, TransportError>,
    now: DateTime<Utc>,
    policy: &VerifyPolicy,
) -> CheckVerdict {
    let submitted_at = leg.submitted_at.unwrap_or(now);

    leg.check_count = leg.check_count.saturating_add(1);
    leg.last_check_at = Some(now);
    let exhausted = policy.is_exhausted(leg.check_count, submitted_at, now);

    match result {
        Ok(Some(snapshot)) if snapshot.captured_at >= submitted_at => {
            leg.status = LegStatus::VerifiedOk;
            leg.snapshot_at = Some(snapshot.captured_at);
            leg.last_check_error = None;
            if leg.archive_url.is_none() && !snapshot.url.is_empty() {
                leg.archive_url = Some(snapshot.url);
            }
            CheckVerdict::Confirmed
        }
        Ok(_) => {
            leg.last_check_error = None;
            if exhausted {
                leg.status = LegStatus::VerifiedFailed;
                CheckVerdict::Failed
            } else {
                leg.status = LegStatus::AwaitingVerification;
                CheckVerdict::Awaiting
            }
        }
        Err(e) => {
            leg.last_check_error = Some(e.to_string());
            if exhausted {
                leg.status = LegStatus::Error;
                leg.error_message = Some(EXHAUSTED_UNRESOLVED.to_string());
                CheckVerdict::Unresolved
            } else {
                CheckVerdict::Inconclusive
            }
        }
    }
}

pub struct Verifier {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    checkers: Vec<Arc<dyn AvailabilityChecker>>,
    policy: VerifyPolicy,
}

impl Verifier {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, policy: VerifyPolicy) -> Self {
        Self {
            db,
            clock,
            checkers: Vec::new(),
            policy,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn AvailabilityChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    pub fn policy(&self) -> &VerifyPolicy {
        &self.policy
    }

    fn checker_for(&self, service: Service) -> Option<&Arc<dyn AvailabilityChecker>> {
        self.checkers.iter().find(|c| c.service() == service)
    }

    /// Check every due leg once
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<VerifyReport> {
        let due = legs_due_for_verification(
            &self.db,
            self.clock.now(),
            self.policy.min_age,
            self.policy.recheck_interval,
            self.policy.batch_size,
        )
        .await?;

        tracing::debug!(legs = due.len(), "Verification pass");
        let mut report = VerifyReport::default();

        for (index, pending) in due.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Verification pass interrupted by shutdown");
                break;
            }

            if index > 0 {
                let pause = jittered(self.policy.pause, self.policy.pause_jitter);
                if !pause.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.clock.sleep(pause) => {}
                    }
                }
            }

            let Some(checker) = self.checker_for(pending.leg.key.service) else {
                tracing::debug!(service = %pending.leg.key.service, "No availability checker; skipping");
                continue;
            };

            let key = pending.leg.key.clone();
            match self.check_leg(checker.as_ref(), pending).await {
                Ok(verdict) => {
                    report.checked += 1;
                    match verdict {
                        CheckVerdict::Confirmed => report.confirmed += 1,
                        CheckVerdict::Awaiting => report.awaiting += 1,
                        CheckVerdict::Failed => report.failed += 1,
                        CheckVerdict::Inconclusive => report.inconclusive += 1,
                        CheckVerdict::Unresolved => report.unresolved += 1,
                    }
                }
                Err(e) => {
                    report.store_errors += 1;
                    tracing::warn!(
                        item_id = %key.item_id,
                        variant = %key.variant,
                        service = %key.service,
                        error = %e,
                        "Failed to record verification result"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn check_leg(&self, checker: &dyn AvailabilityChecker, pending: LegWithItem) -> Result<CheckVerdict> {
        let LegWithItem { mut leg, item } = pending;
        let since = leg.submitted_at.unwrap_or_else(|| self.clock.now());

        let result = match variant_url(&item.permalink, leg.key.variant) {
            Ok(url) => checker.check(&url, since).await,
            Err(e) => Err(TransportError::Parse(format!("invalid permalink: {}", e))),
        };

        let verdict = apply_check(&mut leg, result, self.clock.now(), &self.policy);

        let key = &leg.key;
        match verdict {
            CheckVerdict::Confirmed => tracing::info!(
                item_id = %key.item_id,
                variant = %key.variant,
                service = %key.service,
                status = %leg.status,
                snapshot_at = ?leg.snapshot_at,
                "Capture confirmed"
            ),
            CheckVerdict::Awaiting => tracing::info!(
                item_id = %key.item_id,
                variant = %key.variant,
                service = %key.service,
                check_count = leg.check_count,
                "No capture since submission yet"
            ),
            CheckVerdict::Failed => tracing::warn!(
                item_id = %key.item_id,
                variant = %key.variant,
                service = %key.service,
                check_count = leg.check_count,
                "Verification ceiling reached without capture"
            ),
            CheckVerdict::Inconclusive | CheckVerdict::Unresolved => tracing::warn!(
                item_id = %key.item_id,
                variant = %key.variant,
                service = %key.service,
                status = %leg.status,
                error = leg.last_check_error.as_deref().unwrap_or(""),
                "Availability check failed"
            ),
        }

        update_leg(&self.db, &leg).await?;
        Ok(verdict)
    }
}
