//! Per-upstream failure-ratio circuit breaker.
//!
//! Unlike a consecutive-failure counter, this breaker looks at the ratio of
//! failures to total calls inside a rolling window, and only trips once a
//! minimum sample size has been observed — a handful of failures right after
//! startup should not open the breaker.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::models::upstream::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::HalfOpen,
            2 => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }
}

struct Window {
    started_at: Instant,
    total: u64,
    failures: u64,
}

impl Window {
    fn fresh() -> Self {
        Self {
            started_at: Instant::now(),
            total: 0,
            failures: 0,
        }
    }
}

/// An admission permit that must be settled exactly once via [`CircuitBreaker::settle`].
pub struct Permit {
    entered_half_open: bool,
}

/// A single upstream's failure-isolation state machine.
///
/// Constructed behind an `Arc` so it can be shared between the load balancer
/// (which may read health) and the forward pipeline (which admits and settles).
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: AtomicU8,
    window: RwLock<Window>,
    opened_at: RwLock<Option<Instant>>,
    half_open_inflight: AtomicU32,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error("circuit open for '{0}'")]
    Open(String),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window: RwLock::new(Window::fresh()),
            opened_at: RwLock::new(None),
            half_open_inflight: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Attempts to admit one call. Returns a [`Permit`] that must be settled,
    /// or an error if the breaker is open.
    pub fn admit(&self) -> Result<Permit, AdmitError> {
        match self.state() {
            CircuitState::Closed => Ok(Permit {
                entered_half_open: false,
            }),
            CircuitState::Open => {
                let cooled_down = self
                    .opened_at
                    .read()
                    .expect("breaker lock poisoned")
                    .map(|since| since.elapsed() >= Duration::from_millis(self.config.cooldown_ms))
                    .unwrap_or(false);
                if cooled_down {
                    self.transition_to_half_open();
                    self.try_enter_half_open()
                } else {
                    Err(AdmitError::Open(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => self.try_enter_half_open(),
        }
    }

    fn try_enter_half_open(&self) -> Result<Permit, AdmitError> {
        let mut inflight = self.half_open_inflight.load(Ordering::SeqCst);
        loop {
            if inflight >= self.config.half_open_max_requests {
                return Err(AdmitError::Open(self.name.clone()));
            }
            match self.half_open_inflight.compare_exchange(
                inflight,
                inflight + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Ok(Permit {
                        entered_half_open: true,
                    })
                }
                Err(observed) => inflight = observed,
            }
        }
    }

    /// Records the outcome of a call admitted by [`Self::admit`].
    pub fn settle(&self, permit: Permit, success: bool) {
        if permit.entered_half_open {
            self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);
            if success {
                if self.half_open_inflight.load(Ordering::SeqCst) == 0 && self.state() == CircuitState::HalfOpen {
                    self.transition_to_closed();
                }
            } else {
                self.transition_to_open();
            }
            return;
        }

        let mut window = self.window.write().expect("breaker lock poisoned");
        if window.started_at.elapsed() >= Duration::from_millis(self.config.window_ms) {
            *window = Window::fresh();
        }
        window.total += 1;
        if !success {
            window.failures += 1;
        }
        let ratio = window.failures as f64 / window.total as f64;
        let should_trip = window.total >= self.config.min_requests && ratio >= self.config.failure_threshold;
        drop(window);
        if should_trip {
            self.transition_to_open();
        }
    }

    fn transition_to_open(&self) {
        let previous = self.state();
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        *self.opened_at.write().expect("breaker lock poisoned") = Some(Instant::now());
        self.half_open_inflight.store(0, Ordering::SeqCst);
        if previous != CircuitState::Open {
            warn!("circuit '{}' transitioned {:?} -> open", self.name, previous);
        }
    }

    fn transition_to_half_open(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("circuit '{}' transitioned open -> half-open", self.name);
        }
    }

    fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        *self.window.write().expect("breaker lock poisoned") = Window::fresh();
        *self.opened_at.write().expect("breaker lock poisoned") = None;
        info!("circuit '{}' transitioned half-open -> closed", self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 0.5,
            min_requests: 10,
            cooldown_ms: 50,
            half_open_max_requests: 1,
            window_ms: 60_000,
        }
    }

    #[test]
    fn stays_closed_below_min_requests() {
        let breaker = CircuitBreaker::new("u1", config());
        for _ in 0..9 {
            let permit = breaker.admit().unwrap();
            breaker.settle(permit, false);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_once_ratio_and_min_requests_met() {
        let breaker = CircuitBreaker::new("u1", config());
        for _ in 0..10 {
            let permit = breaker.admit().unwrap();
            breaker.settle(permit, false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.admit(), Err(AdmitError::Open(_))));
    }

    #[test]
    fn half_open_success_closes_and_failure_reopens() {
        let breaker = CircuitBreaker::new("u1", config());
        for _ in 0..10 {
            let permit = breaker.admit().unwrap();
            breaker.settle(permit, false);
        }
        std::thread::sleep(Duration::from_millis(60));
        let permit = breaker.admit().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.settle(permit, true);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new("u1", config());
        for _ in 0..10 {
            let permit = breaker.admit().unwrap();
            breaker.settle(permit, false);
        }
        std::thread::sleep(Duration::from_millis(60));
        let permit = breaker.admit().unwrap();
        breaker.settle(permit, false);
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
