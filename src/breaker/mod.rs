//! Circuit breaker for origin protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: origin assumed down, requests fail fast
//! - Half-Open: testing if the origin recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first caller after open_duration_ms dwell
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails
//! ```
//!
//! # Design Decisions
//! - Per-origin breaker (not global), created lazily on first call
//! - Fail fast in Open state, no queueing behind the dwell
//! - State lives in an AtomicU8; transitions are compare-and-swap, so
//!   concurrent callers never skip or duplicate a step
//! - Failure definition is caller-supplied; the breaker never inspects HTTP
//! - Transitions publish synchronously to the observer after the CAS

pub mod events;

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use thiserror::Error;

use crate::config::BreakerConfig;
pub use events::{NullObserver, TransitionEvent, TransitionObserver};

/// Breaker state. The discriminants are the atomic cell encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    /// Label used in logs and the metrics snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// The circuit refused the call.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("circuit open for origin '{origin}'")]
pub struct CircuitOpen {
    pub origin: String,
}

/// Caller-side judgement of an attempted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
}

/// Per-origin circuit breaker.
pub struct CircuitBreaker {
    origin: String,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    failure_threshold: u32,
    open_duration: Duration,
    observer: Arc<dyn TransitionObserver>,
}

impl CircuitBreaker {
    pub fn new(origin: &str, config: &BreakerConfig, observer: Arc<dyn TransitionObserver>) -> Self {
        Self {
            origin: origin.to_string(),
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            failure_threshold: config.failure_threshold,
            open_duration: Duration::from_millis(config.open_duration_ms),
            observer,
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Gate a call. `Ok(())` means the caller may proceed and must report
    /// the outcome via [`on_success`](Self::on_success) or
    /// [`on_failure`](Self::on_failure).
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let dwell_over = self
                    .opened_at
                    .lock()
                    .expect("breaker opened_at mutex poisoned")
                    .map(|t| t.elapsed() >= self.open_duration)
                    .unwrap_or(false);

                if !dwell_over {
                    return Err(self.refused());
                }

                // One caller wins the probe; losers keep observing Open.
                if self.transition(BreakerState::Open, BreakerState::HalfOpen) {
                    Ok(())
                } else {
                    Err(self.refused())
                }
            }
        }
    }

    /// Record a successful outcome.
    pub fn on_success(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                if self.transition(BreakerState::HalfOpen, BreakerState::Closed) {
                    self.consecutive_failures.store(0, Ordering::Release);
                    *self
                        .opened_at
                        .lock()
                        .expect("breaker opened_at mutex poisoned") = None;
                }
            }
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed outcome.
    pub fn on_failure(&self) {
        match self.state() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold
                    && self.transition(BreakerState::Closed, BreakerState::Open)
                {
                    self.stamp_opened();
                }
            }
            BreakerState::HalfOpen => {
                if self.transition(BreakerState::HalfOpen, BreakerState::Open) {
                    self.stamp_opened();
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run `op` under the breaker. The op reports its own verdict; the
    /// breaker observes it and updates state.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, CircuitOpen>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (T, Verdict)>,
    {
        self.try_acquire()?;
        let (value, verdict) = op().await;
        match verdict {
            Verdict::Success => self.on_success(),
            Verdict::Failure => self.on_failure(),
        }
        Ok(value)
    }

    fn refused(&self) -> CircuitOpen {
        CircuitOpen {
            origin: self.origin.clone(),
        }
    }

    fn stamp_opened(&self) {
        *self
            .opened_at
            .lock()
            .expect("breaker opened_at mutex poisoned") = Some(Instant::now());
    }

    /// CAS the state and, on the winning transition, publish the event.
    fn transition(&self, from: BreakerState, to: BreakerState) -> bool {
        let won = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            let event = TransitionEvent {
                origin: self.origin.clone(),
                from,
                to,
                at: SystemTime::now(),
            };
            tracing::info!(
                origin = %event.origin,
                from = event.from.as_str(),
                to = event.to.as_str(),
                "Breaker transition"
            );
            self.observer.on_transition(&event);
        }
        won
    }
}

/// One named breaker per origin, created lazily and never evicted.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
    observer: Arc<dyn TransitionObserver>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, observer: Arc<dyn TransitionObserver>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            observer,
        }
    }

    /// Breaker for one origin, creating it on first use.
    pub fn get(&self, origin: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(origin.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    origin,
                    &self.config,
                    self.observer.clone(),
                ))
            })
            .clone()
    }

    /// Current state per known origin, for the metrics snapshot.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}
