//! Dispatcher worker: claims batch jobs off the queue and, for each
//! recipient, runs the claim → send → record pipeline.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use crate::campaigns::CampaignRepository;
use crate::completion::CompletionMonitor;
use crate::events::EventLog;
use crate::events::EventSource;
use crate::events::EventType;
use crate::events::NewEvent;
use crate::provider::OutboundMessage;
use crate::provider::ProviderClient;
use crate::provider::ProviderErrorKind;
use crate::queue::BatchJob;
use crate::queue::JobQueue;
use crate::queue::JobRecipient;
use crate::queue::RateLimiter;
use crate::suppression::SuppressionStore;
use crate::work_records::WorkRecordStore;

/// Progress is reported to the queue every `PROGRESS_EVERY` recipients, a
/// short summary logged every `LOG_EVERY`.
const PROGRESS_EVERY: usize = 10;
const LOG_EVERY: usize = 25;

/// Admin on/off switch for background polling (`POST /queue/pause|resume`).
/// Checked by the worker loop in `main.rs` between `poll_once` calls —
/// pausing never interrupts a batch already in flight, it only stops new
/// jobs from being claimed.
#[derive(Default)]
pub struct DispatchControl {
    paused: AtomicBool,
}

impl DispatchControl {
    pub fn new() -> Self { Self::default() }
    pub fn pause(&self) { self.paused.store(true, Ordering::SeqCst); }
    pub fn resume(&self) { self.paused.store(false, Ordering::SeqCst); }
    pub fn is_paused(&self) -> bool { self.paused.load(Ordering::SeqCst) }
}

pub struct Dispatcher<Q, W, S, P, R, L, E> {
    worker_id: String,
    lock_ttl: Duration,
    job_queue: Arc<Q>,
    work_record_store: Arc<W>,
    suppression_store: Arc<S>,
    provider_client: Arc<P>,
    rate_limiter: Arc<R>,
    campaign_repository: Arc<L>,
    event_log: Arc<E>,
}

impl<Q, W, S, P, R, L, E> Dispatcher<Q, W, S, P, R, L, E>
where
    Q: JobQueue,
    W: WorkRecordStore,
    S: SuppressionStore,
    P: ProviderClient,
    R: RateLimiter,
    L: CampaignRepository,
    E: EventLog,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        lock_ttl: Duration,
        job_queue: Arc<Q>,
        work_record_store: Arc<W>,
        suppression_store: Arc<S>,
        provider_client: Arc<P>,
        rate_limiter: Arc<R>,
        campaign_repository: Arc<L>,
        event_log: Arc<E>,
    ) -> Self {
        Self {
            worker_id,
            lock_ttl,
            job_queue,
            work_record_store,
            suppression_store,
            provider_client,
            rate_limiter,
            campaign_repository,
            event_log,
        }
    }

    /// One iteration of the poll loop: claim at most one job, process it
    /// fully, return whether work was found. The caller (`main.rs`) sleeps
    /// between `false` returns to avoid a busy-spin on an empty queue.
    #[tracing::instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll_once(&self) -> Result<bool, anyhow::Error> {
        let Some(job) = self.job_queue.claim_next(&self.worker_id).await? else {
            return Ok(false);
        };

        self.process_job(&job).await?;

        let monitor = CompletionMonitor::new(self.work_record_store.clone(), self.job_queue.clone(), self.campaign_repository.clone());
        monitor.check(job.campaign_id).await?;

        Ok(true)
    }

    async fn process_job(
        &self,
        job: &BatchJob,
    ) -> Result<(), anyhow::Error> {
        let mut processed = 0usize;
        for recipient in &job.recipients {
            match self.process_recipient(job.campaign_id, recipient).await {
                Ok(()) => {}
                Err(RecipientError::RateLimited) => {
                    tokio::time::sleep(StdDuration::from_secs(60)).await;
                    self.job_queue.mark_failed(&job.job_id, "rate_limit").await?;
                    return Ok(());
                }
            }

            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                tracing::debug!(job_id = %job.job_id, processed, "batch progress");
            }
            if processed % LOG_EVERY == 0 {
                tracing::info!(job_id = %job.job_id, processed, total = job.recipients.len(), "batch summary");
            }
        }

        self.job_queue.mark_completed(&job.job_id).await?;
        Ok(())
    }

    /// Runs the suppression-check, claim, send, and record steps for a
    /// single recipient. `recipient` already carries the personalized
    /// subject/html/from the Materializer rendered for it — nothing here
    /// reads campaign content directly.
    async fn process_recipient(
        &self,
        campaign_id: Uuid,
        recipient: &JobRecipient,
    ) -> Result<(), RecipientError> {
        let suppression = self
            .suppression_store
            .lookup(&recipient.email)
            .await
            .map_err(|_| ())
            .unwrap_or(crate::suppression::SuppressionStatus::Active);

        if suppression.is_suppressed() {
            let _ = self.work_record_store.mark_skipped(&recipient.fingerprint, suppression.skip_reason()).await;
            return Ok(());
        }

        let Ok(Some(_claimed)) =
            self.work_record_store.claim_for_processing(&recipient.fingerprint, &self.worker_id, self.lock_ttl).await
        else {
            // Already sending elsewhere, already terminal (including the
            // sent/delivered idempotency case), or a store error — either
            // way there is nothing this call should do.
            return Ok(());
        };

        self.rate_limiter.acquire().await;

        let message_id = crate::domain::fingerprint::provider_message_id(&recipient.fingerprint);
        let message = OutboundMessage {
            to: &recipient.email,
            from: &recipient.from,
            reply_to: recipient.reply_to.as_deref(),
            subject: &recipient.subject,
            html_body: &recipient.html,
            message_id: &message_id,
        };

        match self.provider_client.send(message).await {
            Ok(outcome) => {
                let _ = self
                    .work_record_store
                    .mark_sent(&recipient.fingerprint, &self.worker_id, &outcome.provider_message_id)
                    .await;
                let _ = self
                    .event_log
                    .append(NewEvent {
                        campaign_id,
                        customer_id: recipient.customer_id,
                        email: recipient.email.clone(),
                        event_type: EventType::Sent,
                        source: EventSource::Dispatcher,
                        provider_event_id: None,
                        provider_message_id: Some(outcome.provider_message_id),
                        metadata: json!({}),
                    })
                    .await;
                let _ = self.campaign_repository.increment_sent(campaign_id).await;
                Ok(())
            }
            Err(ProviderErrorKind::RateLimit) => {
                let _ = self.work_record_store.release(&recipient.fingerprint, &self.worker_id, "rate_limit").await;
                Err(RecipientError::RateLimited)
            }
            Err(kind) if kind.is_retryable() => {
                let _ = self
                    .work_record_store
                    .release(&recipient.fingerprint, &self.worker_id, &kind.to_string())
                    .await;
                Ok(())
            }
            Err(kind) => {
                let _ = self
                    .work_record_store
                    .mark_failed(&recipient.fingerprint, &self.worker_id, &kind.to_string())
                    .await;
                let event_type = if kind == ProviderErrorKind::InvalidEmail { EventType::Bounced } else { EventType::Delayed };
                let _ = self
                    .event_log
                    .append(NewEvent {
                        campaign_id,
                        customer_id: recipient.customer_id,
                        email: recipient.email.clone(),
                        event_type,
                        source: EventSource::Dispatcher,
                        provider_event_id: None,
                        provider_message_id: None,
                        metadata: json!({ "error": kind.to_string() }),
                    })
                    .await;
                let _ = self.campaign_repository.increment_failed(campaign_id).await;
                Ok(())
            }
        }
    }
}

enum RecipientError {
    RateLimited,
}
