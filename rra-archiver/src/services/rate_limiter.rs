//! Per-service submission spacing

use chrono::{DateTime, Utc};
use rand::Rng;
use rra_common::db::Service;
use rra_common::time::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// `base` plus a uniformly random extra in `[0, jitter]`
pub fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0.0..=jitter.as_secs_f64());
    base.saturating_add(Duration::from_secs_f64(extra))
}

/// Enforces a minimum gap between two permitted calls to one service
///
/// The mutex is held across the wait, so concurrent callers are served one
/// at a time and each observes the spacing relative to the previous permit.
/// With a non-zero jitter every gap is stretched by a fresh random extra.
pub struct RateLimiter {
    service: Service,
    min_interval: Duration,
    jitter: Duration,
    clock: Arc<dyn Clock>,
    last_permit: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(service: Service, min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            min_interval,
            jitter: Duration::ZERO,
            clock,
            last_permit: Mutex::new(None),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspend until the next call is allowed, then record it
    ///
    /// Dropping the returned future before it completes records nothing.
    pub async fn wait(&self) {
        let mut last = self.last_permit.lock().await;

        if let Some(last_time) = *last {
            let gap = jittered(self.min_interval, self.jitter);
            let elapsed = (self.clock.now() - last_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < gap {
                let wait_time = gap - elapsed;
                tracing::debug!(service = %self.service, "Rate limiting: waiting {:?}", wait_time);
                self.clock.sleep(wait_time).await;
            }
        }

        *last = Some(self.clock.now());
    }
}
