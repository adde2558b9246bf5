//! Append-only record of everything that happened to a send, whether
//! produced by this service (sent) or reported back by the provider via
//! webhook (delivered, opened, clicked, bounced, complained, unsubscribed,
//! purchased). Idempotent on `provider_event_id` so a replayed webhook
//! never double-counts.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    Delayed,
    Purchased,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
            Self::Unsubscribed => "unsubscribed",
            Self::Delayed => "delayed",
            Self::Purchased => "purchased",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "opened" => Self::Opened,
            "clicked" => Self::Clicked,
            "bounced" => Self::Bounced,
            "complained" => Self::Complained,
            "unsubscribed" => Self::Unsubscribed,
            "delayed" => Self::Delayed,
            "purchased" => Self::Purchased,
            _ => return None,
        })
    }
}

/// Where an event entered the system. Distinguishes our own dispatcher
/// writes from provider webhook callbacks, which matters when a field
/// (e.g. `stat_sent`) must only ever be derived from one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Dispatcher,
    Webhook,
    External,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatcher => "dispatcher",
            Self::Webhook => "webhook",
            Self::External => "external",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub campaign_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub event_type: EventType,
    pub source: EventSource,
    pub provider_event_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub event_type: EventType,
    pub source: String,
    pub provider_event_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub metadata: Value,
}

#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Appends the event. Returns `false` without inserting when
    /// `provider_event_id` is `Some` and already recorded — the idempotency
    /// guarantee webhook replays depend on.
    async fn append(
        &self,
        event: NewEvent,
    ) -> Result<bool, anyhow::Error>;

    async fn count_by_type(
        &self,
        campaign_id: Uuid,
        event_type: EventType,
    ) -> Result<i64, anyhow::Error>;
}

pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait::async_trait]
impl EventLog for PgEventLog {
    #[tracing::instrument(skip(self, event))]
    async fn append(
        &self,
        event: NewEvent,
    ) -> Result<bool, anyhow::Error> {
        let event_type = event.event_type.as_str();
        let source = event.source.as_str();
        let result = sqlx::query!(
            r#"
            INSERT INTO events (
                campaign_id, customer_id, email, event_type, source,
                provider_event_id, provider_message_id, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (provider_event_id) WHERE provider_event_id IS NOT NULL DO NOTHING
            "#,
            event.campaign_id,
            event.customer_id,
            event.email,
            event_type,
            source,
            event.provider_event_id,
            event.provider_message_id,
            event.metadata,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_type(
        &self,
        campaign_id: Uuid,
        event_type: EventType,
    ) -> Result<i64, anyhow::Error> {
        let event_type = event_type.as_str();
        let row = sqlx::query!(
            r#"
            SELECT count(*) as "count!" FROM events
            WHERE campaign_id = $1 AND event_type = $2
            "#,
            campaign_id,
            event_type,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.count)
    }
}

#[cfg(test)]
pub mod test_double {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryEventLog {
        events: Mutex<Vec<Event>>,
    }

    impl InMemoryEventLog {
        pub fn new() -> Self { Self::default() }

        pub fn all(&self) -> Vec<Event> { self.events.lock().unwrap().clone() }
    }

    impl Clone for Event {
        fn clone(&self) -> Self {
            Self {
                event_id: self.event_id,
                campaign_id: self.campaign_id,
                customer_id: self.customer_id,
                email: self.email.clone(),
                event_type: self.event_type,
                source: self.source.clone(),
                provider_event_id: self.provider_event_id.clone(),
                provider_message_id: self.provider_message_id.clone(),
                event_date: self.event_date,
                metadata: self.metadata.clone(),
            }
        }
    }

    #[async_trait::async_trait]
    impl EventLog for InMemoryEventLog {
        async fn append(
            &self,
            event: NewEvent,
        ) -> Result<bool, anyhow::Error> {
            let mut events = self.events.lock().unwrap();
            if let Some(provider_event_id) = &event.provider_event_id {
                if events
                    .iter()
                    .any(|e| e.provider_event_id.as_ref() == Some(provider_event_id))
                {
                    return Ok(false);
                }
            }
            events.push(Event {
                event_id: Uuid::new_v4(),
                campaign_id: event.campaign_id,
                customer_id: event.customer_id,
                email: event.email,
                event_type: event.event_type,
                source: event.source.as_str().to_string(),
                provider_event_id: event.provider_event_id,
                provider_message_id: event.provider_message_id,
                event_date: Utc::now(),
                metadata: event.metadata,
            });
            Ok(true)
        }

        async fn count_by_type(
            &self,
            campaign_id: Uuid,
            event_type: EventType,
        ) -> Result<i64, anyhow::Error> {
            let events = self.events.lock().unwrap();
            Ok(events
                .iter()
                .filter(|e| e.campaign_id == campaign_id && e.event_type == event_type)
                .count() as i64)
        }
    }
}
