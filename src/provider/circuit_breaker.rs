//! Mutex-guarded circuit breaker in front of the Provider Client. Opens after
//! a run of consecutive failures, and probes a single half-open request
//! before fully closing again — the upstream call itself must never run
//! while the mutex is held, or one slow request would stall every worker.

use std::sync::Mutex;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

/// Returned by `CircuitBreaker::check` before a provider call, and fed back
/// via `on_success`/`on_failure` after.
pub struct Permit {
    probe: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit open, retry after cooldown")]
pub struct CircuitOpenError;

impl CircuitBreaker {
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState { self.inner.lock().unwrap().state }

    /// Call before attempting a provider send. Returns `Err` immediately
    /// (fail-fast, no network call made) while open and before the cooldown
    /// has elapsed. Once the cooldown elapses, lets exactly one caller
    /// through as a half-open probe.
    pub fn check(&self) -> Result<Permit, CircuitOpenError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(Permit { probe: false }),
            CircuitState::HalfOpen => Ok(Permit { probe: true }),
            CircuitState::Open => {
                let opened_at = inner.opened_at.expect("open state always has opened_at");
                if Utc::now() - opened_at >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    Ok(Permit { probe: true })
                } else {
                    Err(CircuitOpenError)
                }
            }
        }
    }

    pub fn on_success(
        &self,
        permit: Permit,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen | CircuitState::Open => {
                if permit.probe {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.opened_at = None;
                    }
                }
            }
        }
    }

    pub fn on_failure(
        &self,
        _permit: Permit,
    ) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                // a half-open probe failing re-opens immediately
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Utc::now());
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Utc::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// A client-side error (bad request, invalid recipient) is the caller's
    /// fault, not the provider's, so it must not trip the breaker. Instead
    /// it decrements the failure count, floored at zero, so a recipient
    /// list with a few bad addresses mixed into an otherwise healthy run
    /// doesn't slowly ratchet the breaker toward opening.
    pub fn on_client_error(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(3, 1, Duration::seconds(30));
        for _ in 0..2 {
            let permit = breaker.check().unwrap();
            breaker.on_failure(permit);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_fast_while_open_before_cooldown() {
        let breaker = CircuitBreaker::new(1, 1, Duration::seconds(30));
        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn half_open_probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, 2, Duration::seconds(0));
        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);
        // cooldown is zero, so the next check immediately becomes half-open
        let permit = breaker.check().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.on_failure(permit);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn client_error_decrements_failure_count_without_tripping() {
        let breaker = CircuitBreaker::new(2, 1, Duration::seconds(30));
        let permit = breaker.check().unwrap();
        breaker.on_failure(permit); // consecutive_failures = 1

        breaker.on_client_error(); // back to 0
        breaker.on_client_error(); // floored, stays at 0

        // threshold is 2, so it still takes two real failures to trip, not one
        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);
        assert_eq!(breaker.state(), CircuitState::Closed);

        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn closes_after_enough_half_open_successes() {
        let breaker = CircuitBreaker::new(1, 2, Duration::seconds(0));
        let permit = breaker.check().unwrap();
        breaker.on_failure(permit);

        let permit = breaker.check().unwrap();
        breaker.on_success(permit);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let permit = breaker.check().unwrap();
        breaker.on_success(permit);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
