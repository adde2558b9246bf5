use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::CampaignWorkStats;
use super::WorkRecord;
use super::WorkRecordStatus;

/// Traited so the dispatcher/materializer can be exercised against an
/// in-memory double in unit tests without a live Postgres connection (see
/// `test_double` below).
#[async_trait::async_trait]
pub trait WorkRecordStore: Send + Sync {
    /// Idempotent insert-if-absent. Returns whether a new row was created.
    async fn upsert_pending(
        &self,
        fingerprint: &str,
        campaign_id: Uuid,
        email: &str,
        customer_id: Option<Uuid>,
    ) -> Result<bool, anyhow::Error>;

    /// Atomic compare-and-set claim. `Some` only when the record was in
    /// `pending`/`failed` and not held by a live lock.
    async fn claim_for_processing(
        &self,
        fingerprint: &str,
        worker_id: &str,
        lock_ttl: Duration,
    ) -> Result<Option<WorkRecord>, anyhow::Error>;

    /// Transition a record to `skipped` (suppression at dispatch time). No
    /// lock is required — a skip decision precedes claiming.
    async fn mark_skipped(
        &self,
        fingerprint: &str,
        reason: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn mark_sent(
        &self,
        fingerprint: &str,
        worker_id: &str,
        provider_message_id: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn mark_failed(
        &self,
        fingerprint: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<bool, anyhow::Error>;

    /// Used on a retryable error: returns the record to `pending`,
    /// increments `attempts`, releases the lock.
    async fn release(
        &self,
        fingerprint: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<bool, anyhow::Error>;

    /// Bulk reset of expired locks. Returns the number of records
    /// recovered. Run at worker startup and on the periodic sweep.
    async fn recover_expired_locks(
        &self,
        lock_ttl: Duration,
    ) -> Result<u64, anyhow::Error>;

    async fn get_campaign_stats(
        &self,
        campaign_id: Uuid,
    ) -> Result<CampaignWorkStats, anyhow::Error>;

    async fn get(
        &self,
        fingerprint: &str,
    ) -> Result<Option<WorkRecord>, anyhow::Error>;

    /// Records stuck in `sending` past the lock TTL, across every campaign
    /// (the `/health` endpoint's stuck-lock count — read-only, unlike
    /// `recover_expired_locks`).
    async fn count_stuck_locks(
        &self,
        lock_ttl: Duration,
    ) -> Result<i64, anyhow::Error>;
}

pub struct PgWorkRecordStore {
    pool: PgPool,
}

impl PgWorkRecordStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn row_to_status(value: &str) -> WorkRecordStatus {
    // A row we wrote ourselves should always parse; if a migration adds a
    // status we forgot to teach `WorkRecordStatus::parse`, treating it as
    // `Failed` is safer than panicking in a hot dispatch path.
    WorkRecordStatus::parse(value).unwrap_or(WorkRecordStatus::Failed)
}

#[async_trait::async_trait]
impl WorkRecordStore for PgWorkRecordStore {
    #[tracing::instrument(skip(self))]
    async fn upsert_pending(
        &self,
        fingerprint: &str,
        campaign_id: Uuid,
        email: &str,
        customer_id: Option<Uuid>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            INSERT INTO work_records (fingerprint, campaign_id, email, customer_id, status)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
            fingerprint,
            campaign_id,
            email,
            customer_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_for_processing(
        &self,
        fingerprint: &str,
        worker_id: &str,
        lock_ttl: Duration,
    ) -> Result<Option<WorkRecord>, anyhow::Error> {
        let expiry_threshold = Utc::now() - lock_ttl;
        let row = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'sending', locked_by = $2, locked_at = now()
            WHERE fingerprint = $1
                AND status IN ('pending', 'failed')
                AND (locked_at IS NULL OR locked_at < $3)
            RETURNING
                fingerprint, campaign_id, email, customer_id, status, attempts,
                locked_by, locked_at, external_message_id, last_error,
                skip_reason, skipped_at, created_at
            "#,
            fingerprint,
            worker_id,
            expiry_threshold,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| WorkRecord {
            fingerprint: r.fingerprint,
            campaign_id: r.campaign_id,
            email: r.email,
            customer_id: r.customer_id,
            status: row_to_status(&r.status),
            attempts: r.attempts,
            locked_by: r.locked_by,
            locked_at: r.locked_at,
            external_message_id: r.external_message_id,
            last_error: r.last_error,
            skip_reason: r.skip_reason,
            skipped_at: r.skipped_at,
            created_at: r.created_at,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_skipped(
        &self,
        fingerprint: &str,
        reason: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'skipped', skip_reason = $2, skipped_at = now()
            WHERE fingerprint = $1 AND status IN ('pending', 'failed')
            "#,
            fingerprint,
            reason,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_sent(
        &self,
        fingerprint: &str,
        worker_id: &str,
        provider_message_id: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'sent', external_message_id = $3, locked_by = NULL, locked_at = NULL
            WHERE fingerprint = $1 AND locked_by = $2
            "#,
            fingerprint,
            worker_id,
            provider_message_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(
        &self,
        fingerprint: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'failed', last_error = $3, locked_by = NULL, locked_at = NULL
            WHERE fingerprint = $1 AND locked_by = $2
            "#,
            fingerprint,
            worker_id,
            error_message,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        fingerprint: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'pending', attempts = attempts + 1, last_error = $3,
                locked_by = NULL, locked_at = NULL
            WHERE fingerprint = $1 AND locked_by = $2
            "#,
            fingerprint,
            worker_id,
            error_message,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn recover_expired_locks(
        &self,
        lock_ttl: Duration,
    ) -> Result<u64, anyhow::Error> {
        let expiry_threshold = Utc::now() - lock_ttl;
        let result = sqlx::query!(
            r#"
            UPDATE work_records
            SET status = 'pending', locked_by = NULL, locked_at = NULL
            WHERE status = 'sending' AND locked_at < $1
            "#,
            expiry_threshold,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn get_campaign_stats(
        &self,
        campaign_id: Uuid,
    ) -> Result<CampaignWorkStats, anyhow::Error> {
        let rows = sqlx::query!(
            r#"
            SELECT status, count(*) as "count!"
            FROM work_records
            WHERE campaign_id = $1
            GROUP BY status
            "#,
            campaign_id,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = CampaignWorkStats::default();
        for row in rows {
            match row_to_status(&row.status) {
                WorkRecordStatus::Pending => stats.pending = row.count,
                WorkRecordStatus::Sending => stats.sending = row.count,
                WorkRecordStatus::Sent => stats.sent = row.count,
                WorkRecordStatus::Delivered => stats.delivered = row.count,
                WorkRecordStatus::Failed => stats.failed = row.count,
                WorkRecordStatus::Bounced => stats.bounced = row.count,
                WorkRecordStatus::Skipped => stats.skipped = row.count,
            }
        }
        Ok(stats)
    }

    #[tracing::instrument(skip(self))]
    async fn get(
        &self,
        fingerprint: &str,
    ) -> Result<Option<WorkRecord>, anyhow::Error> {
        let row = sqlx::query!(
            r#"
            SELECT
                fingerprint, campaign_id, email, customer_id, status, attempts,
                locked_by, locked_at, external_message_id, last_error,
                skip_reason, skipped_at, created_at
            FROM work_records
            WHERE fingerprint = $1
            "#,
            fingerprint,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| WorkRecord {
            fingerprint: r.fingerprint,
            campaign_id: r.campaign_id,
            email: r.email,
            customer_id: r.customer_id,
            status: row_to_status(&r.status),
            attempts: r.attempts,
            locked_by: r.locked_by,
            locked_at: r.locked_at,
            external_message_id: r.external_message_id,
            last_error: r.last_error,
            skip_reason: r.skip_reason,
            skipped_at: r.skipped_at,
            created_at: r.created_at,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn count_stuck_locks(
        &self,
        lock_ttl: Duration,
    ) -> Result<i64, anyhow::Error> {
        let expiry_threshold = Utc::now() - lock_ttl;
        let row = sqlx::query!(
            r#"
            SELECT count(*) as "count!" FROM work_records
            WHERE status = 'sending' AND locked_at < $1
            "#,
            expiry_threshold,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.count)
    }
}

#[cfg(test)]
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;

    struct Row {
        record: WorkRecord,
    }

    /// In-memory work-record store backing the claim-exclusivity and
    /// lock-recovery unit tests without a Postgres dependency. The mutex
    /// makes the CAS operations trivially atomic, mirroring what the
    /// `UPDATE ... WHERE` does under Postgres row locking.
    #[derive(Default)]
    pub struct InMemoryWorkRecordStore {
        rows: Mutex<HashMap<String, Row>>,
    }

    impl InMemoryWorkRecordStore {
        pub fn new() -> Self { Self::default() }
    }

    #[async_trait::async_trait]
    impl WorkRecordStore for InMemoryWorkRecordStore {
        async fn upsert_pending(
            &self,
            fingerprint: &str,
            campaign_id: Uuid,
            email: &str,
            customer_id: Option<Uuid>,
        ) -> Result<bool, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(fingerprint) {
                return Ok(false);
            }
            rows.insert(
                fingerprint.to_string(),
                Row {
                    record: WorkRecord {
                        fingerprint: fingerprint.to_string(),
                        campaign_id,
                        email: email.to_string(),
                        customer_id,
                        status: WorkRecordStatus::Pending,
                        attempts: 0,
                        locked_by: None,
                        locked_at: None,
                        external_message_id: None,
                        last_error: None,
                        skip_reason: None,
                        skipped_at: None,
                        created_at: Utc::now(),
                    },
                },
            );
            Ok(true)
        }

        async fn claim_for_processing(
            &self,
            fingerprint: &str,
            worker_id: &str,
            lock_ttl: Duration,
        ) -> Result<Option<WorkRecord>, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(fingerprint) else {
                return Ok(None);
            };
            let claimable = matches!(row.record.status, WorkRecordStatus::Pending | WorkRecordStatus::Failed)
                && row
                    .record
                    .locked_at
                    .map(|locked_at| Utc::now() - locked_at > lock_ttl)
                    .unwrap_or(true);
            if !claimable {
                return Ok(None);
            }
            row.record.status = WorkRecordStatus::Sending;
            row.record.locked_by = Some(worker_id.to_string());
            row.record.locked_at = Some(Utc::now());
            Ok(Some(row.record.clone()))
        }

        async fn mark_skipped(
            &self,
            fingerprint: &str,
            reason: &str,
        ) -> Result<bool, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(fingerprint) else {
                return Ok(false);
            };
            if !matches!(row.record.status, WorkRecordStatus::Pending | WorkRecordStatus::Failed) {
                return Ok(false);
            }
            row.record.status = WorkRecordStatus::Skipped;
            row.record.skip_reason = Some(reason.to_string());
            row.record.skipped_at = Some(Utc::now());
            Ok(true)
        }

        async fn mark_sent(
            &self,
            fingerprint: &str,
            worker_id: &str,
            provider_message_id: &str,
        ) -> Result<bool, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(fingerprint) else {
                return Ok(false);
            };
            if row.record.locked_by.as_deref() != Some(worker_id) {
                return Ok(false);
            }
            row.record.status = WorkRecordStatus::Sent;
            row.record.external_message_id = Some(provider_message_id.to_string());
            row.record.locked_by = None;
            row.record.locked_at = None;
            Ok(true)
        }

        async fn mark_failed(
            &self,
            fingerprint: &str,
            worker_id: &str,
            error_message: &str,
        ) -> Result<bool, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(fingerprint) else {
                return Ok(false);
            };
            if row.record.locked_by.as_deref() != Some(worker_id) {
                return Ok(false);
            }
            row.record.status = WorkRecordStatus::Failed;
            row.record.last_error = Some(error_message.to_string());
            row.record.locked_by = None;
            row.record.locked_at = None;
            Ok(true)
        }

        async fn release(
            &self,
            fingerprint: &str,
            worker_id: &str,
            error_message: &str,
        ) -> Result<bool, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(fingerprint) else {
                return Ok(false);
            };
            if row.record.locked_by.as_deref() != Some(worker_id) {
                return Ok(false);
            }
            row.record.status = WorkRecordStatus::Pending;
            row.record.attempts += 1;
            row.record.last_error = Some(error_message.to_string());
            row.record.locked_by = None;
            row.record.locked_at = None;
            Ok(true)
        }

        async fn recover_expired_locks(
            &self,
            lock_ttl: Duration,
        ) -> Result<u64, anyhow::Error> {
            let mut rows = self.rows.lock().unwrap();
            let mut recovered = 0;
            for row in rows.values_mut() {
                if row.record.status == WorkRecordStatus::Sending {
                    if let Some(locked_at) = row.record.locked_at {
                        if Utc::now() - locked_at > lock_ttl {
                            row.record.status = WorkRecordStatus::Pending;
                            row.record.locked_by = None;
                            row.record.locked_at = None;
                            recovered += 1;
                        }
                    }
                }
            }
            Ok(recovered)
        }

        async fn get_campaign_stats(
            &self,
            campaign_id: Uuid,
        ) -> Result<CampaignWorkStats, anyhow::Error> {
            let rows = self.rows.lock().unwrap();
            let mut stats = CampaignWorkStats::default();
            for row in rows.values().filter(|r| r.record.campaign_id == campaign_id) {
                match row.record.status {
                    WorkRecordStatus::Pending => stats.pending += 1,
                    WorkRecordStatus::Sending => stats.sending += 1,
                    WorkRecordStatus::Sent => stats.sent += 1,
                    WorkRecordStatus::Delivered => stats.delivered += 1,
                    WorkRecordStatus::Failed => stats.failed += 1,
                    WorkRecordStatus::Bounced => stats.bounced += 1,
                    WorkRecordStatus::Skipped => stats.skipped += 1,
                }
            }
            Ok(stats)
        }

        async fn get(
            &self,
            fingerprint: &str,
        ) -> Result<Option<WorkRecord>, anyhow::Error> {
            Ok(self.rows.lock().unwrap().get(fingerprint).map(|r| r.record.clone()))
        }

        async fn count_stuck_locks(
            &self,
            lock_ttl: Duration,
        ) -> Result<i64, anyhow::Error> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .values()
                .filter(|r| {
                    r.record.status == WorkRecordStatus::Sending
                        && r.record.locked_at.map(|locked_at| Utc::now() - locked_at > lock_ttl).unwrap_or(false)
                })
                .count() as i64)
        }
    }
}
