//! Feed collaborator: per-source listings of new posts
//!
//! Listings come as RSS 2.0 or Atom (Reddit serves Atom); both are reduced to
//! [`FeedEntry`] values. Parsing is a pure function over the fetched bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{TransportError, QUERY_TIMEOUT, USER_AGENT};

/// Title used when an entry carries none
pub const UNTITLED: &str = "(no title)";

/// One listing entry
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub source_name: String,
    /// Link as published; canonicalized by the coordinator
    pub permalink: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Source of listing entries
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Up to `limit` entries of `source`, in feed order
    async fn fetch(&self, source: &str, limit: usize) -> Result<Vec<FeedEntry>, TransportError>;
}

/// Fetches listings over HTTP from a URL template
pub struct RssFeedSource {
    http_client: reqwest::Client,
    url_template: String,
}

impl RssFeedSource {
    /// `url_template` must contain `{source}`
    pub fn new(url_template: impl Into<String>) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(QUERY_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            url_template: url_template.into(),
        })
    }

    fn feed_url(&self, source: &str) -> String {
        self.url_template
            .replace(rra_common::config::SOURCE_PLACEHOLDER, source)
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch(&self, source: &str, limit: usize) -> Result<Vec<FeedEntry>, TransportError> {
        let url = self.feed_url(source);
        tracing::debug!(source = %source, url = %url, "Fetching feed");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_feed(source, &body, limit)
    }
}

/// Parse an RSS 2.0 or Atom document into at most `limit` entries
///
/// Entries without a link are dropped.
pub fn parse_feed(source: &str, body: &[u8], limit: usize) -> Result<Vec<FeedEntry>, TransportError> {
    let entries = match rss::Channel::read_from(body) {
        Ok(channel) => from_rss(source, &channel),
        Err(rss_err) => match atom_syndication::Feed::read_from(body) {
            Ok(feed) => from_atom(source, &feed),
            Err(atom_err) => {
                return Err(TransportError::Parse(format!(
                    "not RSS ({}) or Atom ({})",
                    rss_err, atom_err
                )))
            }
        },
    };

    Ok(entries.into_iter().take(limit).collect())
}

fn clean_title(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => UNTITLED.to_string(),
    }
}

fn from_rss(source: &str, channel: &rss::Channel) -> Vec<FeedEntry> {
    channel
        .items()
        .iter()
        .filter_map(|item| {
            let link = item.link().map(str::trim).filter(|l| !l.is_empty())?;
            let published_at = item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Some(FeedEntry {
                source_name: source.to_string(),
                permalink: link.to_string(),
                title: clean_title(item.title()),
                published_at,
            })
        })
        .collect()
}

fn from_atom(source: &str, feed: &atom_syndication::Feed) -> Vec<FeedEntry> {
    feed.entries()
        .iter()
        .filter_map(|entry| {
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|l| l.href().trim())
                .filter(|href| !href.is_empty())?;
            let published_at = entry
                .published()
                .unwrap_or_else(|| entry.updated())
                .with_timezone(&Utc);

            Some(FeedEntry {
                source_name: source.to_string(),
                permalink: link.to_string(),
                title: clean_title(Some(entry.title().value.as_str())),
                published_at: Some(published_at),
            })
        })
        .collect()
}
