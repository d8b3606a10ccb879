//! archive.today submission client
//!
//! archive.today has no availability interface, so a submission is the
//! only contact: the outcome is read from the redirect or scraped from the
//! response body.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::LOCATION;
use rra_common::db::Service;
use std::sync::OnceLock;

use super::{ArchiveService, SubmitOutcome, TransportError, SUBMIT_TIMEOUT, USER_AGENT};

const ARCHIVE_TODAY_BASE: &str = "https://archive.vn";
const ARCHIVE_TODAY_SUBMIT: &str = "https://archive.vn/submit/";

/// Reason recorded when the submission hits a challenge wall
pub const BLOCKED_REASON: &str = "blocked (captcha/Cloudflare)";

fn wip_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://archive\.[a-z]+/wip/[A-Za-z0-9]+").expect("valid regex"))
}

fn capture_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://archive\.[a-z]+/[A-Za-z0-9]+").expect("valid regex"))
}

/// HTTP client for archive.today
pub struct ArchiveTodayClient {
    http_client: reqwest::Client,
    submit_url: String,
}

impl ArchiveTodayClient {
    pub fn new() -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http_client,
            submit_url: ARCHIVE_TODAY_SUBMIT.to_string(),
        })
    }

    /// Post submissions to `submit_url` instead of the public endpoint
    pub fn with_submit_url(mut self, submit_url: impl Into<String>) -> Self {
        self.submit_url = submit_url.into();
        self
    }
}

#[async_trait]
impl ArchiveService for ArchiveTodayClient {
    fn service(&self) -> Service {
        Service::ArchiveToday
    }

    async fn submit(&self, url: &str) -> Result<SubmitOutcome, TransportError> {
        tracing::debug!(url = %url, "Submitting to archive.today");

        let response = self
            .http_client
            .post(&self.submit_url)
            .form(&[("url", url)])
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // A body cut off mid-read is a transport failure, not an empty page
        let body = response.text().await?;

        classify_submit_response(status, location.as_deref(), &body)
    }
}

/// Interpret a submission response
pub fn classify_submit_response(
    status: u16,
    location: Option<&str>,
    body: &str,
) -> Result<SubmitOutcome, TransportError> {
    if matches!(status, 301 | 302 | 303 | 307 | 308) {
        if let Some(loc) = location.map(str::trim).filter(|l| !l.is_empty()) {
            let archive_url = if loc.starts_with('/') {
                format!("{}{}", ARCHIVE_TODAY_BASE, loc)
            } else {
                loc.to_string()
            };
            return Ok(SubmitOutcome::Archived { archive_url });
        }
    }

    let lower = body.to_lowercase();
    if lower.contains("captcha") || lower.contains("cloudflare") {
        return Ok(SubmitOutcome::Rejected {
            reason: BLOCKED_REASON.to_string(),
        });
    }

    if let Some(m) = wip_link().find(body).or_else(|| capture_link().find(body)) {
        return Ok(SubmitOutcome::Archived {
            archive_url: m.as_str().to_string(),
        });
    }

    match status {
        200..=299 => Ok(SubmitOutcome::Accepted),
        429 | 500..=599 => Err(TransportError::Http(status)),
        _ => Ok(SubmitOutcome::Rejected {
            reason: format!("archive.today HTTP {}", status),
        }),
    }
}
