//! Per-endpoint circuit breakers.
//!
//! ```text
//!   Closed --(failure_threshold consecutive failures)--> Open
//!   Open   --(cooldown elapsed, next call)-------------> HalfOpen (one trial)
//!   HalfOpen --trial succeeds--> Closed
//!   HalfOpen --trial fails-----> Open (opened_at = now)
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use skycast_core::{Millis, SharedClock};

use crate::error::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// State of one endpoint's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Millis>,
    /// Set while the single half-open trial call is outstanding.
    pub trial_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Outcome of asking a breaker to let a call through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The one half-open trial call.
    Trial,
}

impl CircuitBreakerState {
    fn cooldown_remaining(&self, now: Millis, config: &BreakerConfig) -> u64 {
        let opened_at = self.opened_at.unwrap_or(now);
        let elapsed = now.saturating_sub(opened_at).max(0) as u64;
        (config.cooldown.as_millis() as u64).saturating_sub(elapsed)
    }

    /// Admit a call or return the milliseconds left until one can be admitted.
    pub fn try_admit(&mut self, now: Millis, config: &BreakerConfig) -> Result<Admission, u64> {
        match self.status {
            CircuitStatus::Closed => Ok(Admission::Normal),
            CircuitStatus::Open => {
                let remaining = self.cooldown_remaining(now, config);
                if remaining > 0 {
                    return Err(remaining);
                }
                self.status = CircuitStatus::HalfOpen;
                self.trial_in_flight = true;
                Ok(Admission::Trial)
            }
            CircuitStatus::HalfOpen => {
                if self.trial_in_flight {
                    Err(0)
                } else {
                    self.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        *self = Self::default();
    }

    pub fn on_failure(&mut self, now: Millis, config: &BreakerConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            CircuitStatus::HalfOpen => self.open(now),
            CircuitStatus::Closed if self.consecutive_failures >= config.failure_threshold => {
                self.open(now)
            }
            _ => {}
        }
    }

    /// Give back an unused trial slot without changing state.
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Status as a caller would observe it right now.
    pub fn effective_status(&self, now: Millis, config: &BreakerConfig) -> CircuitStatus {
        if self.status == CircuitStatus::Open && self.cooldown_remaining(now, config) == 0 {
            CircuitStatus::HalfOpen
        } else {
            self.status
        }
    }

    fn open(&mut self, now: Millis) {
        self.status = CircuitStatus::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }
}

/// Registry of breakers keyed by endpoint.
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    config: BreakerConfig,
    clock: SharedClock,
    states: Arc<Mutex<HashMap<String, CircuitBreakerState>>>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask to send a call to `endpoint`; rejected calls never reach the network.
    pub fn admit(&self, endpoint: &str) -> Result<AdmissionGuard, NetworkError> {
        let now = self.clock.now_ms();
        let mut states = self.states.lock();
        let state = states.entry(endpoint.to_string()).or_default();

        match state.try_admit(now, &self.config) {
            Ok(admission) => {
                if admission == Admission::Trial {
                    tracing::info!(endpoint, "Circuit half-open, sending trial request");
                }
                Ok(AdmissionGuard {
                    breakers: self.clone(),
                    endpoint: endpoint.to_string(),
                    admission,
                    settled: false,
                })
            }
            Err(retry_after_ms) => {
                tracing::debug!(endpoint, retry_after_ms, "Circuit open, rejecting request");
                Err(NetworkError::CircuitOpen {
                    endpoint: endpoint.to_string(),
                    retry_after_ms,
                })
            }
        }
    }

    /// Whether calls to `endpoint` are currently being rejected outright.
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.status(endpoint) == CircuitStatus::Open
    }

    pub fn status(&self, endpoint: &str) -> CircuitStatus {
        let now = self.clock.now_ms();
        self.states
            .lock()
            .get(endpoint)
            .map_or(CircuitStatus::Closed, |s| s.effective_status(now, &self.config))
    }

    /// Force a breaker back to Closed.
    pub fn reset(&self, endpoint: &str) {
        self.states.lock().remove(endpoint);
        tracing::info!(endpoint, "Circuit reset");
    }

    fn record_success(&self, endpoint: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(endpoint) {
            if state.status != CircuitStatus::Closed {
                tracing::info!(endpoint, "Circuit closed");
            }
            state.on_success();
        }
    }

    fn record_failure(&self, endpoint: &str) {
        let now = self.clock.now_ms();
        let mut states = self.states.lock();
        let state = states.entry(endpoint.to_string()).or_default();
        let was_open = state.status == CircuitStatus::Open;
        state.on_failure(now, &self.config);
        if state.status == CircuitStatus::Open && !was_open {
            tracing::warn!(
                endpoint,
                failures = state.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    fn release_trial(&self, endpoint: &str) {
        if let Some(state) = self.states.lock().get_mut(endpoint) {
            state.release_trial();
        }
    }
}

/// A granted admission. Settle it with the call's outcome; dropping it
/// unsettled (a cancelled call) frees a half-open trial slot.
#[derive(Debug)]
pub struct AdmissionGuard {
    breakers: CircuitBreakers,
    endpoint: String,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard {
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breakers.record_success(&self.endpoint);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breakers.record_failure(&self.endpoint);
    }

    /// Outcome says nothing about endpoint health.
    pub fn abandon(mut self) {
        self.settled = true;
        if self.is_trial() {
            self.breakers.release_trial(&self.endpoint);
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if !self.settled && self.is_trial() {
            self.breakers.release_trial(&self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycast_core::ManualClock;

    fn breakers(clock: Arc<ManualClock>) -> CircuitBreakers {
        CircuitBreakers::new(BreakerConfig::default(), clock)
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let clock = ManualClock::new(0);
        let b = breakers(clock.clone());

        for _ in 0..4 {
            b.admit("forecast").unwrap().fail();
        }
        assert_eq!(b.status("forecast"), CircuitStatus::Closed);

        b.admit("forecast").unwrap().fail();
        assert_eq!(b.status("forecast"), CircuitStatus::Open);

        let err = b.admit("forecast").unwrap_err();
        assert!(matches!(err, NetworkError::CircuitOpen { retry_after_ms: 30_000, .. }));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let clock = ManualClock::new(0);
        let b = breakers(clock);

        for _ in 0..4 {
            b.admit("forecast").unwrap().fail();
        }
        b.admit("forecast").unwrap().succeed();
        b.admit("forecast").unwrap().fail();

        assert_eq!(b.states.lock()["forecast"].consecutive_failures, 1);
        assert_eq!(b.status("forecast"), CircuitStatus::Closed);
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let clock = ManualClock::new(0);
        let b = breakers(clock.clone());
        for _ in 0..5 {
            b.admit("forecast").unwrap().fail();
        }

        clock.advance(29_999);
        assert!(b.admit("forecast").is_err());

        clock.advance(1);
        assert_eq!(b.status("forecast"), CircuitStatus::HalfOpen);
        let trial = b.admit("forecast").unwrap();
        assert!(trial.is_trial());
        assert!(b.admit("forecast").is_err());

        trial.succeed();
        assert_eq!(b.status("forecast"), CircuitStatus::Closed);
        assert!(!b.admit("forecast").unwrap().is_trial());
    }

    #[test]
    fn test_failed_trial_reopens_with_fresh_cooldown() {
        let clock = ManualClock::new(0);
        let b = breakers(clock.clone());
        for _ in 0..5 {
            b.admit("forecast").unwrap().fail();
        }

        clock.advance(30_000);
        b.admit("forecast").unwrap().fail();

        let state = b.states.lock()["forecast"].clone();
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.opened_at, Some(30_000));

        clock.advance(10_000);
        assert!(b.admit("forecast").is_err());
    }

    #[test]
    fn test_dropped_trial_frees_the_slot() {
        let clock = ManualClock::new(0);
        let b = breakers(clock.clone());
        for _ in 0..5 {
            b.admit("forecast").unwrap().fail();
        }
        clock.advance(30_000);

        drop(b.admit("forecast").unwrap());
        assert!(b.admit("forecast").unwrap().is_trial());
    }

    #[test]
    fn test_endpoints_are_independent() {
        let clock = ManualClock::new(0);
        let b = breakers(clock);
        for _ in 0..5 {
            b.admit("forecast").unwrap().fail();
        }

        assert!(b.is_open("forecast"));
        assert!(!b.is_open("geocoding"));
        assert!(b.admit("geocoding").is_ok());

        b.reset("forecast");
        assert_eq!(b.status("forecast"), CircuitStatus::Closed);
    }
}
