//! Archiver configuration
//!
//! Settings are read from a TOML file into a strongly typed [`Settings`]
//! struct. Every numeric option is validated at load time so a bad value fails
//! at startup with a message naming the file, never deep inside a cycle.
//!
//! A missing file is an error unless the caller explicitly opts into the
//! built-in defaults. No monitored source is ever substituted implicitly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::time::secs_f64;
use crate::{Error, Result};

/// Placeholder replaced by the source name in `feed_url_template`
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Dashboard / read surface listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validated archiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Seconds between cycles in continuous mode
    pub interval: u64,
    /// Maximum feed entries examined per source per cycle
    pub scan_limit: usize,
    /// Monitored sources (subreddit names)
    pub sources: Vec<String>,
    /// Feed URL with a `{source}` placeholder
    pub feed_url_template: String,

    pub do_wayback: bool,
    pub do_archive_today: bool,

    /// Minimum seconds between two Wayback submissions
    pub delay_wayback: f64,
    /// Minimum seconds between two archive.today submissions
    pub delay_archive_today: f64,
    /// Upper bound of a random extra added to every submission delay and
    /// verification pause; 0 keeps the spacing exact
    pub delay_jitter: f64,

    /// Maximum legs checked per verification pass
    pub verify_batch: usize,
    /// Seconds after submission before the first check
    pub verify_min_age: u64,
    /// Seconds between two checks of the same leg
    pub verify_recheck_interval: u64,
    /// Checks after which an unconfirmed leg is declared failed
    pub verify_max_checks: u32,
    /// Seconds after submission after which an unconfirmed leg is declared failed
    pub verify_max_age: u64,
    /// Pause between availability checks within one pass
    pub verify_pause: f64,

    /// Optional JSON export of the most recent legs, rewritten every cycle
    pub out_json: Option<String>,
    pub json_limit: usize,

    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: 180,
            scan_limit: 25,
            sources: Vec::new(),
            feed_url_template: "https://www.reddit.com/r/{source}/new/.rss".to_string(),
            do_wayback: true,
            do_archive_today: true,
            delay_wayback: 5.0,
            delay_archive_today: 8.0,
            delay_jitter: 0.0,
            verify_batch: 40,
            verify_min_age: 60,
            verify_recheck_interval: 900,
            verify_max_checks: 12,
            verify_max_age: 7 * 24 * 3600,
            verify_pause: 1.0,
            out_json: None,
            json_limit: 25,
            dashboard: DashboardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file
    ///
    /// A missing file is reported as a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!(
                    "Config file not found: {} (pass --use-defaults to run with built-in defaults)",
                    path.display()
                ))
            } else {
                Error::Config(format!("Read {} failed: {}", path.display(), e))
            }
        })?;

        let settings = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        info!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    /// Load settings, falling back to defaults only when explicitly allowed
    ///
    /// Parse and validation failures are never masked, even with `use_defaults`.
    pub fn load_or_defaults(path: &Path, use_defaults: bool) -> Result<Self> {
        if !path.exists() && use_defaults {
            warn!(
                "Config file {} not found; using built-in defaults as requested",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every option against its allowed range
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: u64) -> Result<()> {
            if value == 0 {
                return Err(Error::Config(format!("{} must be a positive integer", name)));
            }
            Ok(())
        }

        fn non_negative_secs(name: &str, value: f64) -> Result<()> {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
            Ok(())
        }

        positive("interval", self.interval)?;
        positive("scan_limit", self.scan_limit as u64)?;
        positive("verify_batch", self.verify_batch as u64)?;
        positive("verify_recheck_interval", self.verify_recheck_interval)?;
        positive("verify_max_checks", u64::from(self.verify_max_checks))?;
        positive("json_limit", self.json_limit as u64)?;

        non_negative_secs("delay_wayback", self.delay_wayback)?;
        non_negative_secs("delay_archive_today", self.delay_archive_today)?;
        non_negative_secs("verify_pause", self.verify_pause)?;
        non_negative_secs("delay_jitter", self.delay_jitter)?;

        if self.verify_max_age < self.verify_min_age {
            return Err(Error::Config(format!(
                "verify_max_age ({}) must not be smaller than verify_min_age ({})",
                self.verify_max_age, self.verify_min_age
            )));
        }

        if !self.feed_url_template.contains(SOURCE_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "feed_url_template must contain {}",
                SOURCE_PLACEHOLDER
            )));
        }

        if self.dashboard.enabled && self.dashboard.port == 0 {
            return Err(Error::Config("dashboard.port must be non-zero".to_string()));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn delay_wayback(&self) -> Duration {
        secs_f64(self.delay_wayback)
    }

    pub fn delay_archive_today(&self) -> Duration {
        secs_f64(self.delay_archive_today)
    }

    pub fn verify_pause(&self) -> Duration {
        secs_f64(self.verify_pause)
    }

    pub fn delay_jitter(&self) -> Duration {
        secs_f64(self.delay_jitter)
    }

    /// Feed URL for one source
    pub fn feed_url(&self, source: &str) -> String {
        self.feed_url_template.replace(SOURCE_PLACEHOLDER, source)
    }

    /// Merge configured and command-line sources
    ///
    /// Names are normalized (`r/` prefixes stripped) and deduplicated
    /// case-insensitively, keeping first-seen order. An empty result is an error.
    pub fn resolve_sources(&self, extra: &[String]) -> Result<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let mut resolved = Vec::new();

        for raw in self.sources.iter().chain(extra.iter()) {
            let name = normalize_source(raw);
            if name.is_empty() {
                continue;
            }
            if seen.insert(name.to_lowercase()) {
                resolved.push(name);
            }
        }

        if resolved.is_empty() {
            return Err(Error::Config(
                "No monitored sources configured (set `sources` in the config file or pass --source)"
                    .to_string(),
            ));
        }

        Ok(resolved)
    }
}

/// Strip `/r/` or `r/` prefixes and surrounding slashes/whitespace
fn normalize_source(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    let without_prefix = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("R/"))
        .unwrap_or(trimmed);
    without_prefix.trim_matches('/').trim().to_string()
}
