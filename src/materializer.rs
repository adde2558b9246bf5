//! Materializer: streams a campaign's recipient set, filters suppressed
//! addresses, personalizes the body, upserts work records, and enqueues
//! batch jobs. Runs as its own spawned task, decoupled from the HTTP
//! request that triggered the send.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::Duration;
use secrecy::Secret;
use uuid::Uuid;

use crate::campaigns::Campaign;
use crate::campaigns::CampaignRepository;
use crate::campaigns::TargetKind;
use crate::domain::tracking::rewrite_links;
use crate::domain::tracking::tracking_pixel_tag;
use crate::domain::unsubscribe::unsubscribe_url;
use crate::domain::Fingerprint;
use crate::queue::JobQueue;
use crate::queue::JobRecipient;
use crate::suppression::SuppressionStore;
use crate::work_records::WorkRecordStore;

/// Substitutes the placeholders a campaign body may reference. Intentionally
/// not a templating engine, just the small substitution step personalization
/// needs.
fn substitute_placeholders(
    template: &str,
    name: &str,
    email: &str,
) -> String {
    template.replace("{{name}}", name).replace("{{email}}", email)
}

/// Personalizes one recipient's subject/body: substitutes name/email
/// placeholders, rewrites outbound links through the click-tracking
/// redirect, then appends the unsubscribe link and open-tracking pixel.
/// Returns (subject, html, from).
fn render_recipient(
    campaign: &Campaign,
    candidate: &RecipientCandidate,
    normalized_email: &str,
    fingerprint: Fingerprint,
    base_url: &str,
    unsubscribe_token_secret: &Secret<String>,
) -> (String, String, String) {
    let name = candidate.name.as_deref().unwrap_or("there");
    let subject = substitute_placeholders(&campaign.subject, name, normalized_email);
    let body = substitute_placeholders(&campaign.html_body, name, normalized_email);
    let body = rewrite_links(&body, base_url, campaign.campaign_id, &fingerprint.as_hex());
    let unsubscribe = unsubscribe_url(base_url, unsubscribe_token_secret, campaign.campaign_id, candidate.customer_id, normalized_email);
    let pixel = tracking_pixel_tag(base_url, campaign.campaign_id, &fingerprint.as_hex());
    let html = format!("{body}\n<p style=\"font-size:12px;color:#888888\"><a href=\"{unsubscribe}\">Unsubscribe</a></p>\n{pixel}");
    let from = format!("{} <{}>", campaign.sender_name, campaign.sender_email);
    (subject, html, from)
}

#[derive(Debug, Clone)]
pub struct RecipientCandidate {
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub name: Option<String>,
}

/// Abstracts over the list/segment recipient source, which lives in the
/// (external) customer/segment surface. Implementations page through the
/// source with a keyset cursor so memory stays bounded regardless of N.
#[async_trait::async_trait]
pub trait RecipientSource: Send + Sync {
    async fn count(
        &self,
        target_kind: TargetKind,
        target_ref: &str,
    ) -> Result<i64, anyhow::Error>;

    /// Returns up to `page_size` candidates after `cursor` (a customer id),
    /// ordered by customer id ascending. Empty result means the source is
    /// exhausted.
    async fn stream_page(
        &self,
        target_kind: TargetKind,
        target_ref: &str,
        cursor: Option<Uuid>,
        page_size: i64,
    ) -> Result<Vec<RecipientCandidate>, anyhow::Error>;
}

struct AdaptiveParams {
    cursor: i64,
    upsert_batch: usize,
    enqueue_chunk: usize,
}

/// Small campaigns prioritize latency, large ones prioritize per-operation
/// memory and steady throughput.
fn adaptive_params(total_recipients: i64) -> AdaptiveParams {
    if total_recipients < 5_000 {
        AdaptiveParams { cursor: 500, upsert_batch: 1_000, enqueue_chunk: 5_000 }
    } else if total_recipients < 50_000 {
        AdaptiveParams { cursor: 500, upsert_batch: 500, enqueue_chunk: 3_000 }
    } else if total_recipients < 200_000 {
        AdaptiveParams { cursor: 300, upsert_batch: 300, enqueue_chunk: 2_000 }
    } else {
        AdaptiveParams { cursor: 100, upsert_batch: 100, enqueue_chunk: 1_000 }
    }
}

const BATCH_WIDTH: usize = 100;
const ENQUEUE_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
struct PendingUpsert {
    fingerprint: String,
    email: String,
    customer_id: Option<Uuid>,
}

pub struct Materializer<R, S, W, Q> {
    recipient_source: R,
    suppression_store: S,
    work_record_store: W,
    job_queue: Q,
    campaign_repository: std::sync::Arc<dyn CampaignRepository>,
    base_url: String,
    unsubscribe_token_secret: Secret<String>,
}

impl<R, S, W, Q> Materializer<R, S, W, Q>
where
    R: RecipientSource,
    S: SuppressionStore,
    W: WorkRecordStore,
    Q: JobQueue,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipient_source: R,
        suppression_store: S,
        work_record_store: W,
        job_queue: Q,
        campaign_repository: std::sync::Arc<dyn CampaignRepository>,
        base_url: String,
        unsubscribe_token_secret: Secret<String>,
    ) -> Self {
        Self { recipient_source, suppression_store, work_record_store, job_queue, campaign_repository, base_url, unsubscribe_token_secret }
    }


    #[tracing::instrument(skip(self, campaign), fields(campaign_id = %campaign.campaign_id))]
    pub async fn materialize(
        &self,
        campaign: &Campaign,
    ) -> Result<(), anyhow::Error> {
        let total_recipients = self.recipient_source.count(campaign.target_kind, &campaign.target_ref).await?;

        if total_recipients == 0 {
            self.campaign_repository
                .revert_to_draft_with_error(campaign.campaign_id, "recipient set is empty")
                .await?;
            anyhow::bail!("recipient set is empty for campaign {}", campaign.campaign_id);
        }

        let transitioned = self
            .campaign_repository
            .transition_to_sending(campaign.campaign_id, total_recipients as i32)
            .await?;
        if !transitioned {
            anyhow::bail!("campaign {} is not in a sendable state", campaign.campaign_id);
        }

        let params = adaptive_params(total_recipients);

        let mut seen = HashSet::new();
        let mut upsert_buffer: Vec<PendingUpsert> = Vec::with_capacity(params.upsert_batch);
        let mut enqueue_buffer: Vec<JobRecipient> = Vec::with_capacity(params.enqueue_chunk);
        let mut chunk_index: i32 = 0;
        let mut cursor: Option<Uuid> = None;

        loop {
            let page = self
                .recipient_source
                .stream_page(campaign.target_kind, &campaign.target_ref, cursor, params.cursor)
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().and_then(|c| c.customer_id);

            for candidate in page {
                let normalized = crate::domain::normalize_email(&candidate.email);
                let fingerprint = Fingerprint::new(campaign.campaign_id, &normalized);
                if !seen.insert(fingerprint) {
                    continue;
                }

                let suppression = self.suppression_store.lookup(&normalized).await?;
                if suppression.is_suppressed() {
                    continue;
                }

                let (subject, html, from) =
                    render_recipient(campaign, &candidate, &normalized, fingerprint, &self.base_url, &self.unsubscribe_token_secret);

                upsert_buffer.push(PendingUpsert {
                    fingerprint: fingerprint.as_hex(),
                    email: normalized.clone(),
                    customer_id: candidate.customer_id,
                });
                enqueue_buffer.push(JobRecipient {
                    fingerprint: fingerprint.as_hex(),
                    email: normalized,
                    customer_id: candidate.customer_id,
                    subject,
                    html,
                    from,
                    reply_to: campaign.reply_to.clone(),
                });

                if upsert_buffer.len() >= params.upsert_batch {
                    self.flush_upserts(campaign.campaign_id, &mut upsert_buffer).await?;
                }
                if enqueue_buffer.len() >= params.enqueue_chunk {
                    self.flush_enqueue(campaign.campaign_id, &mut enqueue_buffer, &mut chunk_index).await?;
                    tokio::time::sleep(StdDuration::from_millis(100)).await;
                }
            }
        }

        self.flush_upserts(campaign.campaign_id, &mut upsert_buffer).await?;
        self.flush_enqueue(campaign.campaign_id, &mut enqueue_buffer, &mut chunk_index).await?;

        Ok(())
    }

    async fn flush_upserts(
        &self,
        campaign_id: Uuid,
        buffer: &mut Vec<PendingUpsert>,
    ) -> Result<(), anyhow::Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        for pending in buffer.drain(..) {
            // Duplicate-key errors are expected under retries and are
            // non-fatal.
            if let Err(error) =
                self.work_record_store.upsert_pending(&pending.fingerprint, campaign_id, &pending.email, pending.customer_id).await
            {
                tracing::warn!(error = %error, fingerprint = %pending.fingerprint, "upsert_pending failed, continuing");
            }
        }
        Ok(())
    }

    async fn flush_enqueue(
        &self,
        campaign_id: Uuid,
        buffer: &mut Vec<JobRecipient>,
        chunk_index: &mut i32,
    ) -> Result<(), anyhow::Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        for batch in buffer.drain(..).collect::<Vec<_>>().chunks(BATCH_WIDTH) {
            let index = *chunk_index;
            *chunk_index += 1;
            self.enqueue_with_retry(campaign_id, index, batch.to_vec()).await;
        }
        Ok(())
    }

    /// Up to 3 attempts with 2s/4s/8s backoff. A batch that still fails is
    /// recorded but does not abort materialization — completion-coverage
    /// checks surface any work record left without a covering job.
    async fn enqueue_with_retry(
        &self,
        campaign_id: Uuid,
        chunk_index: i32,
        recipients: Vec<JobRecipient>,
    ) {
        let mut attempt = 0u32;
        loop {
            match self.job_queue.enqueue(campaign_id, chunk_index, recipients.clone()).await {
                Ok(()) => return,
                Err(error) => {
                    attempt += 1;
                    if attempt >= ENQUEUE_RETRY_ATTEMPTS {
                        tracing::error!(
                            error = %error,
                            campaign_id = %campaign_id,
                            chunk_index,
                            "batch enqueue permanently failed, continuing materialization"
                        );
                        return;
                    }
                    let backoff = Duration::seconds(2i64.pow(attempt));
                    tokio::time::sleep(backoff.to_std().unwrap_or(StdDuration::from_secs(2))).await;
                }
            }
        }
    }
}

/// Reads list-target campaigns from `list_members`. Segment targets are
/// resolved by the (external) predicate-evaluation store and are out of
/// scope here.
pub struct PgListRecipientSource {
    pool: sqlx::PgPool,
}

impl PgListRecipientSource {
    pub fn new(pool: sqlx::PgPool) -> Self { Self { pool } }
}

#[async_trait::async_trait]
impl RecipientSource for PgListRecipientSource {
    async fn count(
        &self,
        target_kind: TargetKind,
        target_ref: &str,
    ) -> Result<i64, anyhow::Error> {
        anyhow::ensure!(target_kind == TargetKind::List, "segment targets are resolved externally");
        let list_id: Uuid = target_ref.parse()?;
        let row = sqlx::query!(r#"SELECT count(*) as "count!" FROM list_members WHERE list_id = $1"#, list_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.count)
    }

    async fn stream_page(
        &self,
        target_kind: TargetKind,
        target_ref: &str,
        cursor: Option<Uuid>,
        page_size: i64,
    ) -> Result<Vec<RecipientCandidate>, anyhow::Error> {
        anyhow::ensure!(target_kind == TargetKind::List, "segment targets are resolved externally");
        let list_id: Uuid = target_ref.parse()?;
        let rows = sqlx::query!(
            r#"
            SELECT customer_id, email, name
            FROM list_members
            WHERE list_id = $1 AND customer_id > COALESCE($2, '00000000-0000-0000-0000-000000000000'::uuid)
            ORDER BY customer_id
            LIMIT $3
            "#,
            list_id,
            cursor,
            page_size,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RecipientCandidate { customer_id: Some(r.customer_id), email: r.email, name: r.name })
            .collect())
    }
}
