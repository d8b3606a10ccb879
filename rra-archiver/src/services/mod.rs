//! External collaborators: feed source, archival services, rate limiting
//!
//! Each archival service is reached through a small trait so the workflow
//! can run against fakes in tests. HTTP clients classify raw responses with
//! pure functions that are unit tested without a network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rra_common::db::Service;
use std::time::Duration;
use thiserror::Error;

pub mod archive_today;
pub mod feed;
pub mod permalink;
pub mod rate_limiter;
pub mod wayback;

pub use archive_today::ArchiveTodayClient;
pub use feed::{FeedEntry, FeedSource, RssFeedSource};
pub use rate_limiter::RateLimiter;
pub use wayback::WaybackClient;

/// User-Agent sent with every outbound request
pub const USER_AGENT: &str = concat!(
    "rra-archiver/",
    env!("CARGO_PKG_VERSION"),
    " (feed archival bot)"
);

/// Timeout for submission requests
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(45);

/// Timeout for availability and feed requests
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Inconclusive failure talking to an external service
///
/// Never fatal: the leg keeps its state and is retried later.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Throttling or server-side failure (429, 5xx)
    #[error("HTTP {0}")]
    Http(u16),

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Parse(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Result of a submission the service answered
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Capture accepted and its archive URL is known
    Archived { archive_url: String },
    /// Capture accepted but no archive URL was returned; confirmation deferred
    Accepted,
    /// Definitive refusal (blocked, challenge wall)
    Rejected { reason: String },
}

/// Submission interface of one archival service
#[async_trait]
pub trait ArchiveService: Send + Sync {
    fn service(&self) -> Service;

    async fn submit(&self, url: &str) -> Result<SubmitOutcome, TransportError>;
}

/// Archived capture reported by an availability interface
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub url: String,
    pub captured_at: DateTime<Utc>,
}

/// Availability interface of a timestamp-verifiable service
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    fn service(&self) -> Service;

    /// Closest capture of `url` to `since`, if any
    async fn check(&self, url: &str, since: DateTime<Utc>) -> Result<Option<Snapshot>, TransportError>;
}
