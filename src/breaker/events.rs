//! Breaker transition events.
//!
//! Transitions are published synchronously after the state CAS succeeds, so
//! observers see a total order per origin.

use std::time::SystemTime;

use crate::breaker::BreakerState;

/// A single state transition for one origin's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub origin: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: SystemTime,
}

/// Sink for breaker transitions.
///
/// The proxy installs an observer that records metrics and flips origin
/// availability; tests install recording sinks.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, event: &TransitionEvent);
}

/// Observer that drops every event.
pub struct NullObserver;

impl TransitionObserver for NullObserver {
    fn on_transition(&self, _event: &TransitionEvent) {}
}
