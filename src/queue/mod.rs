//! Job Queue: chunked recipient batches produced by the Materializer and
//! claimed one at a time by Dispatcher workers. A Postgres table claimed with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, the same idiom the delivery worker
//! uses for `issue_delivery_queue`.

pub mod rate_limiter;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

pub use rate_limiter::RateLimiter;
pub use rate_limiter::TokenBucketRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "waiting" => Self::Waiting,
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "delayed" => Self::Delayed,
            _ => return None,
        })
    }
}

/// Wire shape for one recipient inside a batch job. Carries the content the
/// Materializer already personalized (placeholders substituted, links
/// rewritten, unsubscribe link and tracking pixel injected) so the
/// Dispatcher never has to look anything campaign-related back up — every
/// recipient in a batch can carry genuinely different content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecipient {
    pub fingerprint: String,
    pub email: String,
    pub customer_id: Option<Uuid>,
    pub subject: String,
    pub html: String,
    pub from: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub job_id: String,
    pub campaign_id: Uuid,
    pub chunk_index: i32,
    pub recipients: Vec<JobRecipient>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
}

/// Exponential backoff for a job that needs to run again — a whole chunk is
/// retried, not individual recipients within it, because a retry that skips
/// already-sent recipients relies on the Work-Record Store's own idempotency
/// rather than the queue's.
pub fn retry_delay(attempts: i32) -> Duration {
    let capped_attempts = attempts.clamp(0, 6);
    Duration::seconds(30 * 2i64.pow(capped_attempts as u32))
}

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        campaign_id: Uuid,
        chunk_index: i32,
        recipients: Vec<JobRecipient>,
    ) -> Result<(), anyhow::Error>;

    /// Claims the oldest available job, skipping ones currently locked by
    /// another worker.
    async fn claim_next(
        &self,
        worker_id: &str,
    ) -> Result<Option<BatchJob>, anyhow::Error>;

    async fn mark_completed(
        &self,
        job_id: &str,
    ) -> Result<(), anyhow::Error>;

    /// On failure: requeue with backoff if attempts remain, else mark
    /// permanently failed.
    async fn mark_failed(
        &self,
        job_id: &str,
        error_message: &str,
    ) -> Result<(), anyhow::Error>;

    async fn count_by_status(
        &self,
        campaign_id: Uuid,
        status: JobStatus,
    ) -> Result<i64, anyhow::Error>;

    /// Same as `count_by_status`, but across all campaigns — the `/health`
    /// endpoint's view of overall queue depth.
    async fn count_by_status_global(
        &self,
        status: JobStatus,
    ) -> Result<i64, anyhow::Error>;

    /// Deletes `completed`/`failed` jobs older than `older_than`. Completed
    /// jobs are kept around briefly for dedup/observability, but not
    /// forever — this is the admin `POST /queue/clean` operation.
    async fn clean_completed(
        &self,
        older_than: Duration,
    ) -> Result<u64, anyhow::Error>;
}

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait::async_trait]
impl JobQueue for PgJobQueue {
    #[tracing::instrument(skip(self, recipients))]
    async fn enqueue(
        &self,
        campaign_id: Uuid,
        chunk_index: i32,
        recipients: Vec<JobRecipient>,
    ) -> Result<(), anyhow::Error> {
        let job_id = crate::domain::batch_id(campaign_id, chunk_index as u32);
        let recipients_json = serde_json::to_value(&recipients)?;
        sqlx::query!(
            r#"
            INSERT INTO batch_jobs (job_id, campaign_id, chunk_index, recipients)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO NOTHING
            "#,
            job_id,
            campaign_id,
            chunk_index,
            recipients_json,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next(
        &self,
        worker_id: &str,
    ) -> Result<Option<BatchJob>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;
        let row = sqlx::query!(
            r#"
            SELECT job_id, campaign_id, chunk_index, recipients, status, attempts,
                max_attempts, available_at, locked_by, last_error
            FROM batch_jobs
            WHERE status IN ('waiting', 'delayed') AND available_at <= now()
            ORDER BY available_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *transaction)
        .await?;

        let Some(row) = row else {
            transaction.commit().await?;
            return Ok(None);
        };

        sqlx::query!(
            r#"
            UPDATE batch_jobs SET status = 'active', locked_by = $2, locked_at = now()
            WHERE job_id = $1
            "#,
            row.job_id,
            worker_id,
        )
        .execute(&mut *transaction)
        .await?;
        transaction.commit().await?;

        let recipients: Vec<JobRecipient> = serde_json::from_value(row.recipients)?;
        Ok(Some(BatchJob {
            job_id: row.job_id,
            campaign_id: row.campaign_id,
            chunk_index: row.chunk_index,
            recipients,
            status: JobStatus::Active,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            available_at: row.available_at,
            locked_by: Some(worker_id.to_string()),
            last_error: row.last_error,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_completed(
        &self,
        job_id: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query!(
            r#"
            UPDATE batch_jobs SET status = 'completed', completed_at = now(),
                locked_by = NULL, locked_at = NULL
            WHERE job_id = $1
            "#,
            job_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(
        &self,
        job_id: &str,
        error_message: &str,
    ) -> Result<(), anyhow::Error> {
        let row = sqlx::query!(
            r#"SELECT attempts, max_attempts FROM batch_jobs WHERE job_id = $1"#,
            job_id,
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(()) };

        let next_attempts = row.attempts + 1;
        if next_attempts >= row.max_attempts {
            sqlx::query!(
                r#"
                UPDATE batch_jobs SET status = 'failed', attempts = $2, last_error = $3,
                    locked_by = NULL, locked_at = NULL
                WHERE job_id = $1
                "#,
                job_id,
                next_attempts,
                error_message,
            )
            .execute(&self.pool)
            .await?;
        } else {
            let delay = retry_delay(next_attempts);
            let available_at = Utc::now() + delay;
            sqlx::query!(
                r#"
                UPDATE batch_jobs SET status = 'delayed', attempts = $2, last_error = $3,
                    available_at = $4, locked_by = NULL, locked_at = NULL
                WHERE job_id = $1
                "#,
                job_id,
                next_attempts,
                error_message,
                available_at,
            )
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_status(
        &self,
        campaign_id: Uuid,
        status: JobStatus,
    ) -> Result<i64, anyhow::Error> {
        let status = status.as_str();
        let row = sqlx::query!(
            r#"
            SELECT count(*) as "count!" FROM batch_jobs
            WHERE campaign_id = $1 AND status = $2
            "#,
            campaign_id,
            status,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.count)
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_status_global(
        &self,
        status: JobStatus,
    ) -> Result<i64, anyhow::Error> {
        let status = status.as_str();
        let row = sqlx::query!(r#"SELECT count(*) as "count!" FROM batch_jobs WHERE status = $1"#, status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.count)
    }

    #[tracing::instrument(skip(self))]
    async fn clean_completed(
        &self,
        older_than: Duration,
    ) -> Result<u64, anyhow::Error> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query!(
            r#"
            DELETE FROM batch_jobs
            WHERE status IN ('completed', 'failed') AND COALESCE(completed_at, created_at) < $1
            "#,
            cutoff,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_is_capped() {
        assert_eq!(retry_delay(0), Duration::seconds(30));
        assert_eq!(retry_delay(1), Duration::seconds(60));
        assert_eq!(retry_delay(2), Duration::seconds(120));
        // capped at attempts=6 so it never grows unbounded
        assert_eq!(retry_delay(6), retry_delay(20));
    }
}
