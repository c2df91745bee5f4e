//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted → balancer.select()
//!     → registry.rs (snapshot available origins)
//!     → Apply selection strategy:
//!         - round_robin.rs (atomic cursor modulo snapshot)
//!         - random.rs (uniform draw over snapshot)
//!     → Return Arc<Backend> or NoAvailableBackend
//! ```
//!
//! # Design Decisions
//! - One small trait; strategies are interchangeable implementations
//! - The factory picks the implementation from the configured strategy
//! - Availability bits live in the registry, shared by both strategies
//! - Selection is wait-free in the common case

pub mod backend;
pub mod random;
pub mod registry;
pub mod round_robin;

use std::sync::Arc;

use thiserror::Error;

pub use backend::Backend;
pub use registry::BackendRegistry;

use crate::config::Strategy;

/// Selection failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    /// Every origin is currently marked unavailable.
    #[error("no available origin")]
    NoAvailableBackend,
}

/// Per-request origin selection plus availability bookkeeping.
///
/// All operations are safe under arbitrary concurrent callers.
pub trait LoadBalancer: Send + Sync {
    /// Pick an origin from the currently-available subset.
    fn select(&self) -> Result<Arc<Backend>, SelectError>;

    /// Make the origin ineligible for selection.
    fn mark_failed(&self, id: &str);

    /// Make the origin eligible for selection again.
    fn mark_available(&self, id: &str);

    /// Snapshot of the currently-eligible origins.
    fn available_backends(&self) -> Vec<Arc<Backend>>;
}

/// Build the balancer configured by `strategy` over `registry`.
pub fn build(strategy: Strategy, registry: Arc<BackendRegistry>) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(round_robin::RoundRobin::new(registry)),
        Strategy::Random => Arc::new(random::Random::new(registry)),
    }
}
