use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Platform, UnknownVariant};

/// Lifecycle of a sync run: PENDING -> IN_PROGRESS -> terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::Pending,
        SyncStatus::InProgress,
        SyncStatus::Success,
        SyncStatus::PartialSuccess,
        SyncStatus::Failed,
        SyncStatus::Cancelled,
    ];

    /// States a row must currently be in for a move to `next` to be legal
    pub fn predecessors(next: SyncStatus) -> Vec<SyncStatus> {
        Self::ALL.into_iter().filter(|from| from.can_transition_to(next)).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Success => "SUCCESS",
            SyncStatus::PartialSuccess => "PARTIAL_SUCCESS",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Pending | SyncStatus::InProgress)
    }

    /// Legal edges of the run state machine. Terminal rows never move again.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        match (self, next) {
            (SyncStatus::Pending, SyncStatus::InProgress) => true,
            // A run that never got its lease or was cancelled before starting
            (SyncStatus::Pending, SyncStatus::Cancelled | SyncStatus::Failed) => true,
            (SyncStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SyncStatus::Pending),
            "IN_PROGRESS" => Ok(SyncStatus::InProgress),
            "SUCCESS" => Ok(SyncStatus::Success),
            "PARTIAL_SUCCESS" => Ok(SyncStatus::PartialSuccess),
            "FAILED" => Ok(SyncStatus::Failed),
            "CANCELLED" => Ok(SyncStatus::Cancelled),
            other => Err(UnknownVariant { kind: "sync status", value: other.to_string() }),
        }
    }
}

/// Per-category record counts of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub failed: i64,
}

impl SyncCounts {
    pub fn record_created(&mut self) {
        self.processed += 1;
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.processed += 1;
        self.updated += 1;
    }

    pub fn record_failed(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn succeeded(&self) -> i64 {
        self.created + self.updated
    }

    /// Terminal status for a run that processed every fetched record.
    /// An empty run counts as a success.
    pub fn resolved_status(&self) -> SyncStatus {
        match (self.failed, self.succeeded()) {
            (0, _) => SyncStatus::Success,
            (_, 0) => SyncStatus::Failed,
            _ => SyncStatus::PartialSuccess,
        }
    }
}

/// A single record that could not be normalized or written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub reference: String,
    pub reason: String,
}

/// Error payload stored on a SyncLog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncErrorDetail {
    Upstream {
        platform: Platform,
        status: Option<u16>,
        message: String,
    },
    Records {
        failures: Vec<RecordFailure>,
    },
    LeaseUnavailable,
    Cancelled,
    Panicked {
        message: String,
    },
    Store {
        message: String,
    },
}

/// Audit record of one ingestion attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub company_id: Option<Uuid>,
    pub status: SyncStatus,
    pub records_processed: i64,
    pub records_created: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub error: Option<SyncErrorDetail>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncLog {
    pub fn counts(&self) -> SyncCounts {
        SyncCounts {
            processed: self.records_processed,
            created: self.records_created,
            updated: self.records_updated,
            failed: self.records_failed,
        }
    }
}
