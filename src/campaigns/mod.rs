//! Campaign Registry: campaign metadata, status lifecycle, and the aggregate
//! counters dispatch and the (external) webhook path both write to. Rates
//! are always derived on read, never stored.

pub mod repository;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

pub use repository::CampaignRepository;
pub use repository::PgCampaignRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Paused,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "draft" => Self::Draft,
            "scheduled" => Self::Scheduled,
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "paused" => Self::Paused,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Only `draft` and `scheduled` campaigns may be sent.
    pub fn is_sendable(&self) -> bool { matches!(self, Self::Draft | Self::Scheduled) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    List,
    Segment,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Segment => "segment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "list" => Self::List,
            "segment" => Self::Segment,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Campaign {
    pub campaign_id: Uuid,
    pub subject: String,
    pub html_body: String,
    pub sender_name: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub preview_text: Option<String>,
    pub target_kind: TargetKind,
    pub target_ref: String,
    pub status: CampaignStatus,
    pub total_recipients: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub stats_error: Option<String>,
    pub raw_stats: RawStats,
    pub created_at: DateTime<Utc>,
}

/// The counters actually persisted. Everything derived (rates,
/// delivery/open/click percentages) is computed from these, never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStats {
    pub sent: i64,
    pub failed: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub opened: i64,
    pub clicked: i64,
    pub complained: i64,
    pub unsubscribed: i64,
    pub purchased: i64,
}

/// Derived view handed back from `GET /campaigns/{id}/stats`. Every rate
/// uses an explicit denominator and is 0 (not NaN/Inf) when that
/// denominator is 0.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CampaignStatsView {
    pub sent: i64,
    pub failed: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub opened: i64,
    pub clicked: i64,
    pub complained: i64,
    pub unsubscribed: i64,
    pub purchased: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_to_open_rate: f64,
    pub bounce_rate: f64,
    pub unsubscribe_rate: f64,
}

fn percent(
    numerator: i64,
    denominator: i64,
) -> f64 {
    if denominator == 0 { 0.0 } else { (numerator as f64 / denominator as f64) * 100.0 }
}

impl RawStats {
    pub fn derive(&self) -> CampaignStatsView {
        CampaignStatsView {
            sent: self.sent,
            failed: self.failed,
            delivered: self.delivered,
            bounced: self.bounced,
            opened: self.opened,
            clicked: self.clicked,
            complained: self.complained,
            unsubscribed: self.unsubscribed,
            purchased: self.purchased,
            delivery_rate: percent(self.delivered, self.sent),
            open_rate: percent(self.opened, self.delivered),
            click_rate: percent(self.clicked, self.delivered),
            click_to_open_rate: percent(self.clicked, self.opened),
            bounce_rate: percent(self.bounced, self.sent),
            unsubscribe_rate: percent(self.unsubscribed, self.sent),
        }
    }
}
