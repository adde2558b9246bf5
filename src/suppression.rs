//! Indexed lookup of a recipient's deliverability status. Consulted twice
//! per send — once by the materializer (to avoid creating work at all) and
//! once by the dispatcher (to catch suppressions that land between
//! materialization and dispatch).

use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;

use crate::domain::normalize_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceType {
    Hard,
    Soft,
}

/// A recipient's current deliverability state, as tracked on the customer
/// record. `Active` is the only status a marketing send may proceed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionStatus {
    Active,
    Bounced(BounceType),
    Complained,
    Unsubscribed,
}

impl SuppressionStatus {
    pub fn is_suppressed(&self) -> bool { !matches!(self, Self::Active) }

    /// Machine-readable reason stored on a skipped `WorkRecord`.
    pub fn skip_reason(&self) -> &'static str {
        match self {
            Self::Active => "not_suppressed",
            Self::Bounced(BounceType::Hard) => "bounced_hard",
            Self::Bounced(BounceType::Soft) => "bounced_soft",
            Self::Complained => "complained",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

#[async_trait::async_trait]
pub trait SuppressionStore: Send + Sync {
    /// Case-insensitive lookup by normalized email.
    async fn lookup(
        &self,
        email: &str,
    ) -> Result<SuppressionStatus, anyhow::Error>;
}

/// Backed by the `customers` table the (external) customer/segment surface
/// owns. We only ever read it.
pub struct PgSuppressionStore {
    pool: PgPool,
}

impl PgSuppressionStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait::async_trait]
impl SuppressionStore for PgSuppressionStore {
    #[tracing::instrument(skip(self))]
    async fn lookup(
        &self,
        email: &str,
    ) -> Result<SuppressionStatus, anyhow::Error> {
        let normalized = normalize_email(email);
        let row = sqlx::query!(
            r#"
            SELECT
                email_status,
                bounce_is_bounced,
                bounce_type as "bounce_type: String"
            FROM customers
            WHERE email_normalized = $1
            "#,
            normalized,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            // No customer row at all (e.g. a raw list member never synced to the
            // customer store) is treated as active: absence of suppression
            // evidence is not suppression.
            return Ok(SuppressionStatus::Active);
        };

        if row.bounce_is_bounced.unwrap_or(false) {
            let bounce_type = match row.bounce_type.as_deref() {
                Some("hard") => BounceType::Hard,
                _ => BounceType::Soft,
            };
            return Ok(SuppressionStatus::Bounced(bounce_type));
        }

        Ok(match row.email_status.as_deref() {
            Some("complained") => SuppressionStatus::Complained,
            Some("unsubscribed") => SuppressionStatus::Unsubscribed,
            _ => SuppressionStatus::Active,
        })
    }
}

#[cfg(test)]
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory suppression store for unit/property tests — doesn't need a
    /// live Postgres connection, so fingerprinting, materializer buffering,
    /// and dispatcher classification tests can exercise suppression without
    /// standing up a database.
    #[derive(Default)]
    pub struct InMemorySuppressionStore {
        statuses: Mutex<HashMap<String, SuppressionStatus>>,
    }

    impl InMemorySuppressionStore {
        pub fn new() -> Self { Self::default() }

        pub fn set(
            &self,
            email: &str,
            status: SuppressionStatus,
        ) {
            self.statuses
                .lock()
                .unwrap()
                .insert(normalize_email(email), status);
        }
    }

    #[async_trait::async_trait]
    impl SuppressionStore for InMemorySuppressionStore {
        async fn lookup(
            &self,
            email: &str,
        ) -> Result<SuppressionStatus, anyhow::Error> {
            let normalized = normalize_email(email);
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(&normalized)
                .cloned()
                .unwrap_or(SuppressionStatus::Active))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_double::InMemorySuppressionStore;
    use super::*;

    #[tokio::test]
    async fn unknown_email_is_active() {
        let store = InMemorySuppressionStore::new();
        let status = store.lookup("nobody@foo.com").await.unwrap();
        assert_eq!(status, SuppressionStatus::Active);
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let store = InMemorySuppressionStore::new();
        store.set("John@Foo.com", SuppressionStatus::Complained);
        let status = store.lookup("john@foo.com").await.unwrap();
        assert_eq!(status, SuppressionStatus::Complained);
    }

    #[test]
    fn skip_reason_mentions_bounce_kind() {
        assert!(SuppressionStatus::Bounced(BounceType::Hard)
            .skip_reason()
            .contains("bounced"));
    }
}
