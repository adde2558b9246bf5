//! The durable per-recipient send record and the unit of idempotency for the
//! whole dispatch pipeline.

pub mod store;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

pub use store::PgWorkRecordStore;
pub use store::WorkRecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkRecordStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Skipped,
}

impl WorkRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            "bounced" => Self::Bounced,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }

    /// A record in a terminal state will never be claimed or reclaimed again
    /// by the dispatch pipeline (the webhook path can still move
    /// sent -> delivered/bounced, but that's outside this core).
    pub fn is_terminal_for_dispatch(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Failed | Self::Skipped)
    }
}

/// Durable per-recipient send state. A flat record with explicit
/// CAS updates, never a read-modify-write without a version check — the
/// lock fields (`locked_by`, `locked_at`) are that version check.
#[derive(Debug, Clone)]
pub struct WorkRecord {
    pub fingerprint: String,
    pub campaign_id: Uuid,
    pub email: String,
    pub customer_id: Option<Uuid>,
    pub status: WorkRecordStatus,
    pub attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub external_message_id: Option<String>,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts by status for one campaign — backs the stats endpoint
/// and the completion coverage check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignWorkStats {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub bounced: i64,
    pub skipped: i64,
}

impl CampaignWorkStats {
    pub fn total(&self) -> i64 {
        self.pending + self.sending + self.sent + self.delivered + self.failed + self.bounced + self.skipped
    }

    /// Everything that has left the dispatch pipeline's active working set,
    /// one way or another.
    pub fn processed(&self) -> i64 { self.sent + self.delivered + self.failed + self.bounced + self.skipped }
}
