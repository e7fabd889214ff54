//! Per-provider circuit breaker.
//!
//! A provider that fails `failure_threshold` times in a row is skipped by the
//! fallback chain until `cooldown` has passed. The first request after the
//! cooldown is a single half-open probe: success closes the circuit, failure
//! re-opens it for another full cooldown.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit rejects requests before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Returned while the circuit rejects requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open, next probe in {}ms", retry_in.as_millis())]
pub struct CircuitOpen {
    pub retry_in: Duration,
}

/// Point-in-time view of a breaker for health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Times the circuit has opened since start.
    pub trips: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    trips: u64,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_error: Option<String>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("default", CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trips: 0,
                opened_at: None,
                probe_in_flight: false,
                last_error: None,
            }),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a request, moving an expired open circuit to half-open.
    ///
    /// Only one half-open probe is admitted until its outcome is recorded.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut guard = self.guard();
        match guard.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if guard.probe_in_flight => Err(CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            CircuitState::HalfOpen => {
                guard.probe_in_flight = true;
                Ok(())
            }
            CircuitState::Open => {
                let elapsed = guard
                    .opened_at
                    .map_or(self.config.cooldown, |opened_at| opened_at.elapsed());
                if elapsed < self.config.cooldown {
                    return Err(CircuitOpen {
                        retry_in: self.config.cooldown - elapsed,
                    });
                }
                guard.state = CircuitState::HalfOpen;
                guard.probe_in_flight = true;
                info!(provider = %self.label, "circuit half-open, probing");
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.guard();
        if guard.state != CircuitState::Closed {
            info!(provider = %self.label, "circuit closed");
        }
        guard.state = CircuitState::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
        guard.probe_in_flight = false;
    }

    pub fn record_failure(&self, reason: &str) {
        let mut guard = self.guard();
        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
        guard.last_error = Some(reason.to_owned());
        guard.probe_in_flight = false;

        let trip = match guard.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => guard.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
            guard.trips += 1;
            warn!(
                provider = %self.label,
                failures = guard.consecutive_failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.guard().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let guard = self.guard();
        BreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            trips: guard.trips,
            last_error: guard.last_error.clone(),
        }
    }
}
