//! Item and leg records plus the leg state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// One discovered feed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier extracted from the permalink
    pub item_id: String,
    pub source_name: String,
    pub title: String,
    /// Canonical permalink
    pub permalink: String,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
}

/// URL form under which an item is archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Default view (`www.` host)
    Primary,
    /// Alternate view (`old.` host)
    Alternate,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Primary, Variant::Alternate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Primary => "primary",
            Variant::Alternate => "alternate",
        }
    }
}

/// External archival service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Wayback Machine: exposes a timestamped availability interface
    Wayback,
    /// archive.today: best-effort, no verification interface
    ArchiveToday,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::Wayback, Service::ArchiveToday];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Wayback => "wayback",
            Service::ArchiveToday => "archive_today",
        }
    }

    /// Whether the service can confirm a capture after the fact
    pub fn is_verifiable(&self) -> bool {
        matches!(self, Service::Wayback)
    }
}

/// Lifecycle state of one archival leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Unsubmitted,
    Submitted,
    AwaitingVerification,
    VerifiedOk,
    VerifiedFailed,
    Error,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Unsubmitted => "unsubmitted",
            LegStatus::Submitted => "submitted",
            LegStatus::AwaitingVerification => "awaiting_verification",
            LegStatus::VerifiedOk => "verified_ok",
            LegStatus::VerifiedFailed => "verified_failed",
            LegStatus::Error => "error",
        }
    }

    /// No automated process moves a leg out of a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LegStatus::VerifiedOk | LegStatus::VerifiedFailed | LegStatus::Error
        )
    }

    /// Transition guard for automated updates
    ///
    /// Self-transitions record diagnostics (a transport failure during
    /// submission keeps `Unsubmitted`; an inconclusive check keeps the
    /// current pending state). Administrative requeue of `Error` legs goes
    /// through a dedicated store operation, not this guard.
    pub fn can_transition_to(&self, next: LegStatus) -> bool {
        use LegStatus::*;
        match (self, next) {
            (Unsubmitted, Unsubmitted | Submitted | Error) => true,
            (
                Submitted | AwaitingVerification,
                AwaitingVerification | VerifiedOk | VerifiedFailed | Error,
            ) => true,
            (Submitted, Submitted) => true,
            _ => false,
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ty, $what:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| Error::InvalidInput(format!("Unknown {}: {}", $what, s)))
            }
        }
    };
}

impl_str_enum!(Variant, "variant", [Variant::Primary, Variant::Alternate]);
impl_str_enum!(Service, "service", [Service::Wayback, Service::ArchiveToday]);
impl_str_enum!(
    LegStatus,
    "leg status",
    [
        LegStatus::Unsubmitted,
        LegStatus::Submitted,
        LegStatus::AwaitingVerification,
        LegStatus::VerifiedOk,
        LegStatus::VerifiedFailed,
        LegStatus::Error,
    ]
);

/// Unique identity of a leg
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegKey {
    pub item_id: String,
    pub variant: Variant,
    pub service: Service,
}

impl LegKey {
    pub fn new(item_id: impl Into<String>, variant: Variant, service: Service) -> Self {
        Self {
            item_id: item_id.into(),
            variant,
            service,
        }
    }
}

impl fmt::Display for LegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.item_id, self.variant, self.service)
    }
}

/// One archival attempt for an (item, variant, service) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    #[serde(flatten)]
    pub key: LegKey,
    pub status: LegStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub archive_url: Option<String>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub check_count: u32,
    /// Classified reason for `Error`, or the last submission transport failure
    pub error_message: Option<String>,
    /// Last availability-check failure, kept for diagnostics only
    pub last_check_error: Option<String>,
    /// Timestamp of the snapshot that confirmed the leg
    pub snapshot_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Leg {
    /// Fresh leg in `Unsubmitted`
    pub fn new(key: LegKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            status: LegStatus::Unsubmitted,
            submitted_at: None,
            archive_url: None,
            last_check_at: None,
            check_count: 0,
            error_message: None,
            last_check_error: None,
            snapshot_at: None,
            created_at,
        }
    }

    /// Reporting state; never collapses distinct conditions
    pub fn display_state(&self) -> DisplayState {
        match self.status {
            LegStatus::Unsubmitted => DisplayState::NotSubmitted,
            LegStatus::Submitted if !self.key.service.is_verifiable() => DisplayState::Unverified,
            LegStatus::Submitted if self.check_count == 0 => DisplayState::Queued,
            LegStatus::Submitted | LegStatus::AwaitingVerification => DisplayState::Pending,
            LegStatus::VerifiedOk => DisplayState::Confirmed,
            LegStatus::VerifiedFailed => DisplayState::Failed,
            LegStatus::Error => DisplayState::Error,
        }
    }
}

/// Observable leg condition for dashboards and exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    /// Not yet submitted
    NotSubmitted,
    /// Submitted to a verifiable service, never checked
    Queued,
    /// Checked at least once, not yet confirmed
    Pending,
    /// Snapshot at or after submission found
    Confirmed,
    /// Checks exhausted without confirmation
    Failed,
    /// Accepted by a best-effort service; cannot be confirmed
    Unverified,
    /// Rejected or unresolved
    Error,
}

impl DisplayState {
    pub const ALL: [DisplayState; 7] = [
        DisplayState::NotSubmitted,
        DisplayState::Queued,
        DisplayState::Pending,
        DisplayState::Confirmed,
        DisplayState::Failed,
        DisplayState::Unverified,
        DisplayState::Error,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DisplayState::NotSubmitted => "not_submitted",
            DisplayState::Queued => "queued",
            DisplayState::Pending => "pending",
            DisplayState::Confirmed => "confirmed",
            DisplayState::Failed => "failed",
            DisplayState::Unverified => "unverified",
            DisplayState::Error => "error",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DisplayState::NotSubmitted => "not submitted",
            DisplayState::Queued => "queued (not yet checked)",
            DisplayState::Pending => "pending (checked, unconfirmed)",
            DisplayState::Confirmed => "confirmed",
            DisplayState::Failed => "failed (checks exhausted)",
            DisplayState::Unverified => "accepted (unverified)",
            DisplayState::Error => "error",
        }
    }
}

/// A leg together with the item it archives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegWithItem {
    pub leg: Leg,
    pub item: Item,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn leg(service: Service, status: LegStatus, check_count: u32) -> Leg {
        let mut leg = Leg::new(
            LegKey::new("abc123", Variant::Primary, service),
            DateTime::from_timestamp(0, 0).unwrap(),
        );
        leg.status = status;
        leg.check_count = check_count;
        leg
    }

    #[test]
    fn test_string_forms_roundtrip() {
        for status in [
            LegStatus::Unsubmitted,
            LegStatus::Submitted,
            LegStatus::AwaitingVerification,
            LegStatus::VerifiedOk,
            LegStatus::VerifiedFailed,
            LegStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<LegStatus>().unwrap(), status);
        }
        assert_eq!("archive_today".parse::<Service>().unwrap(), Service::ArchiveToday);
        assert_eq!("alternate".parse::<Variant>().unwrap(), Variant::Alternate);
        assert!("bogus".parse::<Service>().is_err());
    }

    #[test]
    fn test_only_wayback_is_verifiable() {
        assert!(Service::Wayback.is_verifiable());
        assert!(!Service::ArchiveToday.is_verifiable());
    }

    #[test]
    fn test_transition_guard_forward_only() {
        use LegStatus::*;
        assert!(Unsubmitted.can_transition_to(Submitted));
        assert!(Unsubmitted.can_transition_to(Error));
        assert!(Unsubmitted.can_transition_to(Unsubmitted));
        assert!(!Unsubmitted.can_transition_to(VerifiedOk));

        assert!(Submitted.can_transition_to(AwaitingVerification));
        assert!(AwaitingVerification.can_transition_to(AwaitingVerification));
        assert!(AwaitingVerification.can_transition_to(VerifiedOk));
        assert!(AwaitingVerification.can_transition_to(VerifiedFailed));
        assert!(!AwaitingVerification.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Unsubmitted));

        for terminal in [VerifiedOk, VerifiedFailed, Error] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(AwaitingVerification));
            assert!(!terminal.can_transition_to(Unsubmitted));
        }
    }

    #[test]
    fn test_never_checked_unconfirmed_and_failed_are_distinct() {
        let never_checked = leg(Service::Wayback, LegStatus::Submitted, 0).display_state();
        let unconfirmed = leg(Service::Wayback, LegStatus::AwaitingVerification, 1).display_state();
        let failed = leg(Service::Wayback, LegStatus::VerifiedFailed, 12).display_state();

        assert_eq!(never_checked, DisplayState::Queued);
        assert_eq!(unconfirmed, DisplayState::Pending);
        assert_eq!(failed, DisplayState::Failed);

        let codes: HashSet<_> = [never_checked, unconfirmed, failed]
            .iter()
            .map(|s| s.code())
            .collect();
        assert_eq!(codes.len(), 3);
    }

    #[test]
    fn test_best_effort_submission_never_reads_as_confirmed() {
        let state = leg(Service::ArchiveToday, LegStatus::Submitted, 0).display_state();
        assert_eq!(state, DisplayState::Unverified);
        assert_ne!(state, DisplayState::Confirmed);
    }

    #[test]
    fn test_rejection_differs_from_accepted_without_url() {
        let accepted = leg(Service::Wayback, LegStatus::Submitted, 0);
        let rejected = leg(Service::Wayback, LegStatus::Error, 0);
        assert_ne!(accepted.display_state(), rejected.display_state());
    }

    #[test]
    fn test_display_codes_unique() {
        let codes: HashSet<_> = DisplayState::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), DisplayState::ALL.len());
    }

    #[test]
    fn test_leg_key_display() {
        let key = LegKey::new("abc123", Variant::Alternate, Service::Wayback);
        assert_eq!(key.to_string(), "abc123/alternate/wayback");
    }
}
