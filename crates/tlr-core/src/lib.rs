//! Core domain model for the tender lifecycle reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tlr-core";

/// Lifecycle state of a tender. Stored as lowercase text in Postgres.
///
/// `Open` is the only state the automated reconciler transitions out of;
/// `Withdrawn`, `Voided`, and `Awarded` are set by manual/administrative
/// processes and must never be overwritten here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenderStatus {
    Open,
    Closed,
    Withdrawn,
    Voided,
    Awarded,
}

impl TenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenderStatus::Open => "open",
            TenderStatus::Closed => "closed",
            TenderStatus::Withdrawn => "withdrawn",
            TenderStatus::Voided => "voided",
            TenderStatus::Awarded => "awarded",
        }
    }

    /// Parse the database representation. Unknown strings yield `None` so
    /// callers decide whether that is an error or a histogram bucket.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(TenderStatus::Open),
            "closed" => Some(TenderStatus::Closed),
            "withdrawn" => Some(TenderStatus::Withdrawn),
            "voided" => Some(TenderStatus::Voided),
            "awarded" => Some(TenderStatus::Awarded),
            _ => None,
        }
    }

    /// Terminal with respect to the reconciler: never overwritten by the
    /// automated `open -> closed` transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TenderStatus::Withdrawn | TenderStatus::Voided | TenderStatus::Awarded
        )
    }
}

impl std::fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical persisted tender record.
///
/// `url` is the natural dedup key against the source site (unique in the
/// schema); `deadline_date` stays null until the extractor finds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tender {
    pub id: Uuid,
    pub title: String,
    pub org_name: String,
    pub url: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub deadline_date: Option<DateTime<Utc>>,
    pub status: TenderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single automated transition: an `open` tender whose deadline is at or
/// before `now` must close. Null deadlines never transition, terminal states
/// are never touched.
pub fn should_close(
    status: TenderStatus,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status == TenderStatus::Open && deadline.is_some_and(|d| d <= now)
}
