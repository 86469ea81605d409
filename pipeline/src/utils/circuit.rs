//! Circuit breaker for outbound provider calls
//!
//! States:
//! - `Closed`: requests flow through normally
//! - `Open`: requests are immediately rejected (fast-fail)
//! - `HalfOpen`: a single probe request is allowed through to test recovery
//!
//! Transitions are serialized by an internal lock. Callers bracket the
//! protected call with [`CircuitBreaker::check`] and then report the outcome
//! via [`CircuitBreaker::on_success`] / [`CircuitBreaker::on_failure`].

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

/// Consecutive failures before the circuit opens
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long the circuit stays open before probing
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Circuit '{name}' is {state:?} — call rejected")]
pub struct CircuitOpen {
    pub name: String,
    pub state: CircuitState,
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_thresholds(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    pub fn with_thresholds(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, advancing Open → HalfOpen when the recovery timeout
    /// has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Gate a protected call. `Ok` admits the call (and reserves the probe
    /// slot in HalfOpen); `Err` means fast-fail without calling out.
    pub fn check(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(CircuitOpen {
                name: self.name.clone(),
                state: CircuitState::Open,
            }),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpen {
                        name: self.name.clone(),
                        state: CircuitState::HalfOpen,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(circuit = %self.name, "Circuit transitioned HALF_OPEN -> CLOSED");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(circuit = %self.name, "Circuit transitioned HALF_OPEN -> OPEN");
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    circuit = %self.name,
                    failures = inner.failure_count,
                    "Circuit transitioned CLOSED -> OPEN"
                );
            }
            _ => {}
        }
    }

    /// Manually reset to Closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    fn advance(&self, inner: &mut CircuitInner) {
        if inner.state == CircuitState::Open {
            if let Some(last) = inner.last_failure {
                if last.elapsed() >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                    tracing::info!(circuit = %self.name, "Circuit transitioned OPEN -> HALF_OPEN");
                }
            }
        }
    }
}
