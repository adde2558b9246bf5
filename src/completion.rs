//! Completion Monitor: detects when every work record for a campaign has
//! reached a terminal state and the queue holds no more pending work for
//! it, then finalizes the campaign. Safe to run redundantly — both
//! reactively after each batch and on a periodic sweep — because the
//! finalize step is itself a CAS.

use std::sync::Arc;

use uuid::Uuid;

use crate::campaigns::CampaignRepository;
use crate::campaigns::CampaignStatus;
use crate::campaigns::RawStats;
use crate::queue::JobQueue;
use crate::queue::JobStatus;
use crate::work_records::WorkRecordStore;

pub struct CompletionMonitor<W, Q, L> {
    work_record_store: Arc<W>,
    job_queue: Arc<Q>,
    campaign_repository: Arc<L>,
}

impl<W, Q, L> CompletionMonitor<W, Q, L>
where
    W: WorkRecordStore,
    Q: JobQueue,
    L: CampaignRepository,
{
    pub fn new(
        work_record_store: Arc<W>,
        job_queue: Arc<Q>,
        campaign_repository: Arc<L>,
    ) -> Self {
        Self { work_record_store, job_queue, campaign_repository }
    }

    /// Checks whether every job for the campaign has left the queue and, if
    /// so, finalizes the campaign's terminal status. Returns whether the
    /// campaign was finalized by this call (false covers both "not ready
    /// yet" and "already finalized by a previous call").
    #[tracing::instrument(skip(self))]
    pub async fn check(
        &self,
        campaign_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let Some(campaign) = self.campaign_repository.get(campaign_id).await? else {
            return Ok(false);
        };
        if campaign.status != CampaignStatus::Sending {
            return Ok(false);
        }

        let wrs_stats = self.work_record_store.get_campaign_stats(campaign_id).await?;
        let processed = wrs_stats.processed();
        if processed < campaign.total_recipients as i64 {
            return Ok(false);
        }

        let waiting = self.job_queue.count_by_status(campaign_id, JobStatus::Waiting).await?;
        let active = self.job_queue.count_by_status(campaign_id, JobStatus::Active).await?;
        let delayed = self.job_queue.count_by_status(campaign_id, JobStatus::Delayed).await?;
        if waiting + active + delayed > 0 {
            return Ok(false);
        }

        let stats = RawStats {
            sent: wrs_stats.sent + wrs_stats.delivered,
            failed: wrs_stats.failed,
            delivered: campaign.raw_stats.delivered,
            bounced: campaign.raw_stats.bounced,
            opened: campaign.raw_stats.opened,
            clicked: campaign.raw_stats.clicked,
            complained: campaign.raw_stats.complained,
            unsubscribed: campaign.raw_stats.unsubscribed,
            purchased: campaign.raw_stats.purchased,
        };

        self.campaign_repository.finalize_sent(campaign_id, stats).await
    }

    /// Periodic half of the completion check: re-runs `check` against every
    /// campaign currently `sending`, so a campaign whose last reactive
    /// check was missed (a crashed worker, a dropped completion event)
    /// still finalizes eventually. Returns the number finalized this pass.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_all_sending(&self) -> Result<usize, anyhow::Error> {
        let sending = self.campaign_repository.list_ids_by_status(CampaignStatus::Sending).await?;
        let mut finalized = 0;
        for campaign_id in sending {
            if self.check(campaign_id).await? {
                finalized += 1;
            }
        }
        Ok(finalized)
    }
}
