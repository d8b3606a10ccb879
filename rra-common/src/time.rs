//! Timestamp utilities and the clock abstraction
//!
//! All scheduling decisions (rate limiting, verification windows, the
//! inter-cycle wait) read time through [`Clock`] so they can be driven by a
//! [`ManualClock`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Error, Result};

/// Wayback-style compact timestamp format (`YYYYMMDDhhmmss`, UTC)
const TS14_FORMAT: &str = "%Y%m%d%H%M%S";

/// Source of the current time and of suspension
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `chrono::Utc` and `tokio::time::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock for tests
///
/// `sleep` advances the simulated time instead of waiting, so a sequence of
/// rate-limited calls completes instantly while still observing the spacing.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given Unix second
    pub fn at_epoch(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    /// Jump to an absolute Unix second
    pub fn set_epoch(&self, secs: i64) {
        if let Some(at) = DateTime::from_timestamp(secs, 0) {
            *self.lock() = at;
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let step = ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero());
        let mut current = self.lock();
        *current += step;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock only means a test panicked mid-advance; the value is still usable
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a timestamp to Unix seconds for storage
///
/// Sub-second instants round up, so a stored time never precedes the event
/// it records. Window cutoffs use [`to_epoch_floor`].
pub fn to_epoch(at: DateTime<Utc>) -> i64 {
    let secs = at.timestamp();
    if at.timestamp_subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Unix seconds rounded down, for the upper bound of a selection window
pub fn to_epoch_floor(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Convert stored Unix seconds back to a timestamp
pub fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Internal(format!("Timestamp out of range: {}", secs)))
}

/// Format as a 14-digit UTC timestamp (`20240131235959`)
pub fn to_ts14(at: DateTime<Utc>) -> String {
    at.format(TS14_FORMAT).to_string()
}

/// Parse a 14-digit UTC timestamp; `None` when malformed
pub fn parse_ts14(ts: &str) -> Option<DateTime<Utc>> {
    if ts.len() != 14 || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(ts, TS14_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert fractional seconds from configuration into a `Duration`
///
/// Negative or non-finite input collapses to zero; configuration validation
/// rejects those values before they reach here.
pub fn secs_f64(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_epoch_roundtrip_is_second_precise() {
        let at = from_epoch(1_700_000_123).unwrap();
        assert_eq!(to_epoch(at), 1_700_000_123);
    }

    #[test]
    fn test_sub_second_rounding() {
        let at = DateTime::from_timestamp(59, 900_000_000).unwrap();
        assert_eq!(to_epoch(at), 60);
        assert_eq!(to_epoch_floor(at), 59);
        assert_eq!(to_epoch_floor(from_epoch(60).unwrap()), 60);
    }

    #[test]
    fn test_ts14_format_and_parse() {
        let at = from_epoch(1_706_745_599).unwrap(); // 2024-01-31 23:59:59 UTC
        assert_eq!(to_ts14(at), "20240131235959");
        assert_eq!(parse_ts14("20240131235959"), Some(at));
    }

    #[test]
    fn test_parse_ts14_rejects_malformed() {
        assert_eq!(parse_ts14(""), None);
        assert_eq!(parse_ts14("2024013123595"), None);
        assert_eq!(parse_ts14("2024013123595x"), None);
        assert_eq!(parse_ts14("20241331235959"), None);
    }

    #[test]
    fn test_secs_f64_clamps_invalid() {
        assert_eq!(secs_f64(-1.0), Duration::ZERO);
        assert_eq!(secs_f64(f64::NAN), Duration::ZERO);
        assert_eq!(secs_f64(1.5), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::at_epoch(100);
        clock.sleep(Duration::from_secs(5)).await;
        assert_eq!(to_epoch(clock.now()), 105);

        clock.set_epoch(970);
        assert_eq!(to_epoch(clock.now()), 970);
    }

    #[tokio::test]
    async fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::at_epoch(0);
        let other = clock.clone();
        other.advance(Duration::from_secs(60));
        assert_eq!(to_epoch(clock.now()), 60);
    }
}
