//! Round-robin load balancing.
//!
//! # Algorithm
//! Advance an atomic cursor by one per call and index modulo the available
//! subset snapshotted at call time. The eligible list may shrink between
//! calls; the modulus always reflects the snapshot.
//!
//! # Design Decisions
//! - Atomic counter, no locks
//! - Cursor resets to 0 at a sentinel well below the integer max

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::balancer::backend::Backend;
use crate::balancer::registry::BackendRegistry;
use crate::balancer::{LoadBalancer, SelectError};

/// Cursor value at which the counter wraps back to zero.
const CURSOR_RESET: usize = usize::MAX / 2;

/// Round-robin selection over the available origin subset.
pub struct RoundRobin {
    registry: Arc<BackendRegistry>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self) -> Result<Arc<Backend>, SelectError> {
        let available = self.registry.snapshot_available();
        if available.is_empty() {
            return Err(SelectError::NoAvailableBackend);
        }

        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        if n >= CURSOR_RESET {
            self.cursor.store(0, Ordering::Relaxed);
        }

        Ok(available[n % available.len()].clone())
    }

    fn mark_failed(&self, id: &str) {
        self.registry.set_available(id, false);
    }

    fn mark_available(&self, id: &str) {
        self.registry.set_available(id, true);
    }

    fn available_backends(&self) -> Vec<Arc<Backend>> {
        self.registry.snapshot_available()
    }
}
