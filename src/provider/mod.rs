//! Provider Client: the one place this service talks to the outbound email
//! provider's HTTP API. Wraps every call in the circuit breaker and
//! classifies the provider's response into the handful of outcomes the
//! Dispatcher actually branches on.

pub mod circuit_breaker;

use std::time::Duration as StdDuration;

use chrono::Duration;
use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitState;

#[derive(Debug)]
pub struct OutboundMessage<'a> {
    pub to: &'a str,
    /// Already formatted `"Display Name <address>"` — the Materializer (or,
    /// for a `test_mode` send, the admin handler) builds this once, since
    /// sender identity doesn't vary per recipient within a campaign.
    pub from: &'a str,
    pub reply_to: Option<&'a str>,
    pub subject: &'a str,
    pub html_body: &'a str,
    /// Our fingerprint, passed through as the provider's idempotency/custom
    /// id so duplicate submissions of the same recipient collapse upstream
    /// too, not just in our own Work-Record Store.
    pub message_id: &'a str,
}

/// How a send attempt failed, collapsed to exactly the categories the
/// Dispatcher needs to decide retry vs. terminal-failure vs. suppression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderErrorKind {
    #[error("provider rate limit exceeded")]
    RateLimit,
    #[error("provider service error")]
    ServiceError,
    #[error("network error reaching provider")]
    NetworkError,
    #[error("provider rejected the request")]
    ClientError,
    #[error("provider rejected the recipient address as invalid")]
    InvalidEmail,
    #[error("circuit open, provider calls are currently fast-failed")]
    CircuitOpen,
}

impl ProviderErrorKind {
    /// Whether the Dispatcher should release the record back to `pending`
    /// for another attempt, as opposed to marking it permanently failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServiceError | Self::NetworkError | Self::CircuitOpen)
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub provider_message_id: String,
}

#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send(
        &self,
        message: OutboundMessage<'_>,
    ) -> Result<SendOutcome, ProviderErrorKind>;

    fn circuit_state(&self) -> CircuitState;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    html: &'a str,
    idempotency_key: &'a str,
}

#[derive(serde::Deserialize)]
struct SendResponse {
    id: String,
}

pub struct HttpProviderClient {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
    circuit_breaker: CircuitBreaker,
}

impl HttpProviderClient {
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        timeout: StdDuration,
        failure_threshold: u32,
        success_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        let http_client = Client::builder().timeout(timeout).build().expect("provider http client config is valid");
        Self {
            http_client,
            base_url,
            api_key,
            circuit_breaker: CircuitBreaker::new(failure_threshold, success_threshold, cooldown),
        }
    }

    fn classify_status(status: reqwest::StatusCode) -> ProviderErrorKind {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderErrorKind::RateLimit
        } else if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY || status == reqwest::StatusCode::BAD_REQUEST {
            ProviderErrorKind::InvalidEmail
        } else if status.is_client_error() {
            ProviderErrorKind::ClientError
        } else {
            ProviderErrorKind::ServiceError
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for HttpProviderClient {
    #[tracing::instrument(name = "Send email to provider", skip(self, message), fields(to = %message.to))]
    async fn send(
        &self,
        message: OutboundMessage<'_>,
    ) -> Result<SendOutcome, ProviderErrorKind> {
        let permit = self.circuit_breaker.check().map_err(|_| ProviderErrorKind::CircuitOpen)?;

        let url = format!("{}/v1/emails", self.base_url);
        let body = SendRequest {
            to: message.to,
            from: message.from.to_string(),
            reply_to: message.reply_to,
            subject: message.subject,
            html: message.html_body,
            idempotency_key: message.message_id,
        };

        let result = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await;

        let outcome = match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<SendResponse>().await {
                    Ok(parsed) => Ok(SendOutcome { provider_message_id: parsed.id }),
                    Err(_) => Err(ProviderErrorKind::ServiceError),
                }
            }
            Ok(response) => Err(Self::classify_status(response.status())),
            Err(_) => Err(ProviderErrorKind::NetworkError),
        };

        match &outcome {
            Ok(_) => self.circuit_breaker.on_success(permit),
            Err(kind) if *kind == ProviderErrorKind::CircuitOpen => {}
            // Rate limits, service errors, and network errors are the
            // provider's own fault and count toward tripping the breaker.
            Err(kind) if kind.is_retryable() => self.circuit_breaker.on_failure(permit),
            // Client errors (bad request, invalid recipient) are our fault,
            // not the provider's — they must not trip the breaker. Drop the
            // permit and nudge the failure count back down instead.
            Err(_) => self.circuit_breaker.on_client_error(),
        }

        outcome
    }

    fn circuit_state(&self) -> CircuitState { self.circuit_breaker.state() }
}
