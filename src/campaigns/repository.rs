use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::Campaign;
use super::CampaignStatus;
use super::RawStats;
use super::TargetKind;

#[async_trait::async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<Campaign>, anyhow::Error>;

    /// CAS: only succeeds from a sendable status. Seeds `total_recipients`
    /// in the same statement so there's no window where the campaign is
    /// `sending` with a stale recipient count.
    async fn transition_to_sending(
        &self,
        campaign_id: Uuid,
        total_recipients: i32,
    ) -> Result<bool, anyhow::Error>;

    /// Materializer fatal path: campaign reverts to `draft` and carries the
    /// error forward for the admin surface to display.
    async fn revert_to_draft_with_error(
        &self,
        campaign_id: Uuid,
        error_message: &str,
    ) -> Result<(), anyhow::Error>;

    async fn increment_sent(
        &self,
        campaign_id: Uuid,
    ) -> Result<(), anyhow::Error>;

    async fn increment_failed(
        &self,
        campaign_id: Uuid,
    ) -> Result<(), anyhow::Error>;

    /// Completion Monitor finalize step. CAS on current status so a second
    /// call (idempotent sweep) is a no-op and never moves `sent_at`.
    async fn finalize_sent(
        &self,
        campaign_id: Uuid,
        stats: RawStats,
    ) -> Result<bool, anyhow::Error>;

    /// Campaigns currently in a given status, across the whole registry
    /// (the `/health` endpoint's sending-campaign count).
    async fn count_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<i64, anyhow::Error>;

    /// Ids of campaigns currently in a given status. Backs the Completion
    /// Monitor's periodic sweep, which has no single campaign id to react
    /// to and instead has to ask "which campaigns are still sending".
    async fn list_ids_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Uuid>, anyhow::Error>;
}

pub struct PgCampaignRepository {
    pool: PgPool,
}

impl PgCampaignRepository {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait::async_trait]
impl CampaignRepository for PgCampaignRepository {
    #[tracing::instrument(skip(self))]
    async fn get(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<Campaign>, anyhow::Error> {
        let row = sqlx::query!(
            r#"
            SELECT
                campaign_id, subject, html_body, sender_name, sender_email,
                reply_to, preview_text, target_kind, target_ref, status,
                total_recipients, sent_at, stats_error,
                stat_sent, stat_failed, stat_delivered, stat_bounced,
                stat_opened, stat_clicked, stat_complained, stat_unsubscribed,
                stat_purchased, created_at
            FROM campaigns WHERE campaign_id = $1
            "#,
            campaign_id,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(Campaign {
            campaign_id: row.campaign_id,
            subject: row.subject,
            html_body: row.html_body,
            sender_name: row.sender_name,
            sender_email: row.sender_email,
            reply_to: row.reply_to,
            preview_text: row.preview_text,
            target_kind: TargetKind::parse(&row.target_kind).unwrap_or(TargetKind::List),
            target_ref: row.target_ref,
            status: CampaignStatus::parse(&row.status).unwrap_or(CampaignStatus::Failed),
            total_recipients: row.total_recipients,
            sent_at: row.sent_at,
            stats_error: row.stats_error,
            raw_stats: RawStats {
                sent: row.stat_sent as i64,
                failed: row.stat_failed as i64,
                delivered: row.stat_delivered as i64,
                bounced: row.stat_bounced as i64,
                opened: row.stat_opened as i64,
                clicked: row.stat_clicked as i64,
                complained: row.stat_complained as i64,
                unsubscribed: row.stat_unsubscribed as i64,
                purchased: row.stat_purchased as i64,
            },
            created_at: row.created_at,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn transition_to_sending(
        &self,
        campaign_id: Uuid,
        total_recipients: i32,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            UPDATE campaigns SET status = 'sending', total_recipients = $2
            WHERE campaign_id = $1 AND status IN ('draft', 'scheduled')
            "#,
            campaign_id,
            total_recipients,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn revert_to_draft_with_error(
        &self,
        campaign_id: Uuid,
        error_message: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query!(
            r#"
            UPDATE campaigns SET status = 'draft', stats_error = $2
            WHERE campaign_id = $1
            "#,
            campaign_id,
            error_message,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn increment_sent(
        &self,
        campaign_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        sqlx::query!(
            r#"UPDATE campaigns SET stat_sent = stat_sent + 1 WHERE campaign_id = $1"#,
            campaign_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn increment_failed(
        &self,
        campaign_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        sqlx::query!(
            r#"UPDATE campaigns SET stat_failed = stat_failed + 1 WHERE campaign_id = $1"#,
            campaign_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    async fn finalize_sent(
        &self,
        campaign_id: Uuid,
        stats: RawStats,
    ) -> Result<bool, anyhow::Error> {
        let now = Utc::now();
        let result = sqlx::query!(
            r#"
            UPDATE campaigns SET
                status = 'sent',
                sent_at = COALESCE(sent_at, $2),
                stat_sent = $3, stat_failed = $4, stat_delivered = $5,
                stat_bounced = $6, stat_opened = $7, stat_clicked = $8,
                stat_complained = $9, stat_unsubscribed = $10
            WHERE campaign_id = $1 AND status = 'sending'
            "#,
            campaign_id,
            now,
            stats.sent as i32,
            stats.failed as i32,
            stats.delivered as i32,
            stats.bounced as i32,
            stats.opened as i32,
            stats.clicked as i32,
            stats.complained as i32,
            stats.unsubscribed as i32,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<i64, anyhow::Error> {
        let status = status.as_str();
        let row = sqlx::query!(r#"SELECT count(*) as "count!" FROM campaigns WHERE status = $1"#, status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.count)
    }

    #[tracing::instrument(skip(self))]
    async fn list_ids_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Uuid>, anyhow::Error> {
        let status = status.as_str();
        let rows = sqlx::query!(r#"SELECT campaign_id FROM campaigns WHERE status = $1"#, status).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.campaign_id).collect())
    }
}
